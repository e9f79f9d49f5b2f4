//! Change event to bulk action translation

use crate::bulk::{BulkAction, BulkMethod};
use crate::error::{Result, WriterError};
use crate::event::{ChangeEvent, OperationKind};
use crate::routing;

/// Translate an event into the bulk action that applies it.
///
/// Pure: the event is only read. Inserts without an `_id` become index
/// actions without one so the store assigns an identifier; updates and
/// deletes must name the document they target.
pub fn translate(event: &ChangeEvent, index: &str, parent_field: Option<&str>) -> Result<BulkAction> {
    let method = match event.op() {
        OperationKind::Insert => BulkMethod::Index,
        OperationKind::Update => BulkMethod::Update,
        OperationKind::Delete => BulkMethod::Delete,
        op @ (OperationKind::Command | OperationKind::Noop) => {
            return Err(WriterError::UnsupportedOperation(op.to_string()));
        }
    };

    let (routing, body) = routing::resolve(event.document().clone(), parent_field);

    if method != BulkMethod::Index && routing.id.is_none() {
        return Err(WriterError::MissingIdentifier {
            op: event.op().to_string(),
            type_name: event.type_name().to_string(),
        });
    }

    Ok(BulkAction {
        method,
        index: sanitize_index(index),
        type_name: event.type_name().to_string(),
        routing,
        body: match method {
            BulkMethod::Delete => None,
            BulkMethod::Index | BulkMethod::Update => Some(body),
        },
    })
}

/// Index names may not contain `.` namespace separators
pub fn sanitize_index(index: &str) -> String {
    index.replace('.', "_")
}
