//! Clipboard transport format for a node selection.
//!
//! ```text
//! <SIGNATURE><fs name><FS>( <id><RS><name><FS> )*
//! ```
//!
//! Names have both separators stripped before embedding, which is lossy but
//! keeps the payload unambiguous.

use compact_str::CompactString;
use std::sync::Arc;
use tracing::trace;

use crate::node::{Node, NodeId};

pub const SIGNATURE: &str = "clipstage:nodes:v1:";
pub const FIELD_SEPARATOR: char = '\u{1f}';
pub const RECORD_SEPARATOR: char = '\u{1e}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardPayload {
    pub file_system_name: CompactString,
    pub entries: Vec<(NodeId, CompactString)>,
}

impl ClipboardPayload {
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }
}

pub struct ClipboardCodec;

impl ClipboardCodec {
    /// Encode `nodes`; the file-system name is taken from the first node.
    pub fn encode(nodes: &[Arc<dyn Node>]) -> String {
        let file_system = nodes
            .first()
            .map(|n| n.file_system_name())
            .unwrap_or_default();
        let entries: Vec<(NodeId, CompactString)> =
            nodes.iter().map(|n| (n.id(), n.name())).collect();

        Self::encode_entries(&file_system, &entries)
    }

    pub fn encode_entries(file_system_name: &str, entries: &[(NodeId, CompactString)]) -> String {
        let mut out = String::with_capacity(
            SIGNATURE.len() + file_system_name.len() + entries.len() * 24,
        );

        out.push_str(SIGNATURE);
        push_stripped(&mut out, file_system_name);
        out.push(FIELD_SEPARATOR);

        for (id, name) in entries {
            out.push_str(id.as_str());
            out.push(RECORD_SEPARATOR);
            push_stripped(&mut out, name);
            out.push(FIELD_SEPARATOR);
        }

        out
    }

    /// `None` if `payload` is not ours or an entry is malformed.
    pub fn decode(payload: &str) -> Option<ClipboardPayload> {
        let start = payload.find(SIGNATURE)? + SIGNATURE.len();
        let mut fields = payload[start..].split(FIELD_SEPARATOR);

        let file_system_name = CompactString::from(fields.next()?);

        let mut entries = Vec::new();
        for field in fields.filter(|f| !f.is_empty()) {
            let Some((id, name)) = field.split_once(RECORD_SEPARATOR) else {
                trace!(field, "Malformed clipboard entry");
                return None;
            };
            entries.push((NodeId::from(id), CompactString::from(name)));
        }

        Some(ClipboardPayload {
            file_system_name,
            entries,
        })
    }
}

fn push_stripped(out: &mut String, value: &str) {
    out.extend(
        value
            .chars()
            .filter(|c| *c != FIELD_SEPARATOR && *c != RECORD_SEPARATOR),
    );
}
