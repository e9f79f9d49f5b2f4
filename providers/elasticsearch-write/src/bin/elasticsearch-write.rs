//! Elasticsearch write runner
//!
//! Reads change events as NDJSON from stdin, one `{"op", "type", "data"}`
//! object per line, writes them through the bulk writer and logs every
//! confirmation. Closes the writer on EOF or ctrl-c.

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use elasticsearch_write_provider::{
    create_writer, ChangeEvent, ConfirmationSink, Document, OperationKind, WriterConfig,
};

#[derive(Debug, Deserialize)]
struct EventLine {
    op: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    data: Document,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive("elasticsearch_write_provider=info".parse()?)
                .add_directive("elasticsearch_write=info".parse()?),
        )
        .init();

    info!("Elasticsearch Write Provider - Starting");

    let config = WriterConfig::from_env().context("Failed to load writer configuration")?;
    info!(
        "Configuration loaded: index={}, urls={:?}, parent_field={:?}",
        config.index,
        config.urls,
        config.parent_field()
    );

    let writer = create_writer(config).context("Failed to create bulk writer")?;

    let (sink, mut confirms) = ConfirmationSink::channel();
    let confirm_logger = tokio::spawn(async move {
        let mut confirmed = 0u64;
        while let Some(confirmation) = confirms.recv().await {
            confirmed += 1;
            info!(
                "Confirmed {} {}/{}",
                confirmation.op,
                confirmation.type_name,
                confirmation.id.as_deref().unwrap_or("<auto>")
            );
        }
        confirmed
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("End of input");
                    break;
                };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }

                let event = match parse_event(&line) {
                    Ok(event) => event.with_confirms(sink.clone()),
                    Err(e) => {
                        warn!("Skipping line {}: {:#}", line_no, e);
                        continue;
                    }
                };

                if let Err(e) = writer.write(event) {
                    warn!("Line {} not written: {}", line_no, e);
                }
            }
        }
    }

    drop(sink);
    let close_result = writer.close().await;
    drop(writer);

    let confirmed = confirm_logger.await.context("Confirmation logger panicked")?;
    info!("{} of {} events confirmed", confirmed, line_no);

    if let Err(e) = close_result {
        error!("Writer closed with error: {}", e);
        return Err(e.into());
    }

    info!("Elasticsearch Write Provider stopped");
    Ok(())
}

fn parse_event(line: &str) -> Result<ChangeEvent> {
    let parsed: EventLine = serde_json::from_str(line).context("Invalid event JSON")?;
    let op: OperationKind = parsed.op.parse()?;
    Ok(ChangeEvent::new(op, parsed.type_name, parsed.data))
}
