//! Content-addressed metadata
//!
//! CIDs referenced by events are scheduled as pending content. When the
//! bytes arrive they are parsed against the schema of the scheduling
//! kind and stored under the CID. Content at a CID never changes, so an
//! entity is written once and later applications are no-ops.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use super::{ContractReader, EventContext, Indexer, WarningKind};
use crate::events::CommunityEvent;
use crate::model::*;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("expected a JSON object")]
    NotAnObject,
}

/// Parsed metadata; a field is `None` when absent or null in the source.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataDocument {
    Proposal { title: Option<String>, description: Option<String> },
    Pool { title: Option<String>, description: Option<String> },
    Covenant { text: Option<String> },
    Dispute { reason: Option<String> },
}

impl MetadataDocument {
    /// Document with every field null
    pub fn empty(kind: MetadataKind) -> Self {
        match kind {
            MetadataKind::Proposal => MetadataDocument::Proposal { title: None, description: None },
            MetadataKind::Pool => MetadataDocument::Pool { title: None, description: None },
            MetadataKind::Covenant => MetadataDocument::Covenant { text: None },
            MetadataKind::Dispute => MetadataDocument::Dispute { reason: None },
        }
    }

    /// Source field names that came back null
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let fields: Vec<(&'static str, bool)> = match self {
            MetadataDocument::Proposal { title, description } | MetadataDocument::Pool { title, description } => {
                vec![("title", title.is_none()), ("description", description.is_none())]
            }
            MetadataDocument::Covenant { text } => vec![("covenant", text.is_none())],
            MetadataDocument::Dispute { reason } => vec![("reason", reason.is_none())],
        };
        fields.into_iter().filter(|(_, missing)| *missing).map(|(name, _)| name).collect()
    }
}

/// Parse raw content as the metadata schema of `kind`.
pub fn parse_metadata(kind: MetadataKind, bytes: &[u8]) -> Result<MetadataDocument, ParseError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(ParseError::NotAnObject);
    };
    let field = |name: &str| match object.get(name) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    Ok(match kind {
        MetadataKind::Proposal => MetadataDocument::Proposal {
            title: field("title"),
            description: field("description"),
        },
        MetadataKind::Pool => MetadataDocument::Pool {
            title: field("title"),
            description: field("description"),
        },
        MetadataKind::Covenant => MetadataDocument::Covenant { text: field("covenant") },
        MetadataKind::Dispute => MetadataDocument::Dispute { reason: field("reason") },
    })
}

impl<R: ContractReader> Indexer<R> {
    pub(crate) fn apply_community(&mut self, ctx: &EventContext, event: &CommunityEvent) {
        match event {
            CommunityEvent::CovenantIpfsHashUpdated { covenant_ipfs_hash } => {
                debug!(community = %ctx.address, cid = %covenant_ipfs_hash, "Covenant updated");
                self.schedule_content(covenant_ipfs_hash, MetadataKind::Covenant);
            }
        }
    }

    /// Apply fetched bytes to every kind a CID is pending as. Returns false
    /// if the CID was never scheduled.
    pub fn apply_content(&mut self, cid: &str, bytes: &[u8]) -> bool {
        let kinds: Vec<MetadataKind> = self
            .pending
            .iter()
            .filter(|(pending, _)| pending == cid)
            .map(|(_, kind)| *kind)
            .collect();
        if kinds.is_empty() {
            debug!(cid, "Content arrived for unscheduled CID");
            return false;
        }
        for kind in kinds {
            self.apply_content_metadata(cid, kind, bytes);
        }
        true
    }

    /// Store the metadata entity for `cid`. Degraded content is stored with
    /// null fields and a warning.
    pub fn apply_content_metadata(&mut self, cid: &str, kind: MetadataKind, bytes: &[u8]) {
        self.pending.remove(&(cid.to_string(), kind));
        if self.store.has_metadata(kind, cid) {
            debug!(cid, kind = kind.as_str(), "Metadata already stored");
            return;
        }

        let ctx = self.content_context();
        let document = match parse_metadata(kind, bytes) {
            Ok(document) => {
                for field in document.missing_fields() {
                    self.warn(
                        &ctx,
                        WarningKind::MetadataSchema,
                        format!("{} metadata {}: '{}' field missing", kind.as_str(), cid, field),
                    );
                }
                document
            }
            Err(e) => {
                self.warn(
                    &ctx,
                    WarningKind::MetadataSchema,
                    format!("{} metadata {}: {}", kind.as_str(), cid, e),
                );
                MetadataDocument::empty(kind)
            }
        };

        let id = cid.to_string();
        match document {
            MetadataDocument::Proposal { title, description } => {
                self.store.proposal_metadata.save(ProposalMetadata { id, title, description })
            }
            MetadataDocument::Pool { title, description } => {
                self.store.pool_metadata.save(PoolMetadata { id, title, description })
            }
            MetadataDocument::Covenant { text } => self.store.covenants.save(Covenant { id, text }),
            MetadataDocument::Dispute { reason } => {
                self.store.dispute_metadata.save(ProposalDisputeMetadata { id, reason })
            }
        }
        info!(cid, kind = kind.as_str(), "Metadata stored");
    }

    /// Content arrives out of band; warnings are pinned to the cursor.
    fn content_context(&self) -> EventContext {
        let (block_number, log_index) = self.cursor.unwrap_or((0, 0));
        EventContext {
            address: Address::ZERO,
            block_number,
            block_timestamp: 0,
            log_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::RecordedReader;

    #[test]
    fn test_parse_full_proposal_document() {
        let doc = parse_metadata(
            MetadataKind::Proposal,
            br#"{"title":"Fund the garden","description":"Seeds and soil"}"#,
        )
        .unwrap();
        assert_eq!(
            doc,
            MetadataDocument::Proposal {
                title: Some("Fund the garden".into()),
                description: Some("Seeds and soil".into()),
            }
        );
        assert!(doc.missing_fields().is_empty());
    }

    #[test]
    fn test_parse_reports_null_fields() {
        let doc = parse_metadata(MetadataKind::Pool, br#"{"title":null}"#).unwrap();
        assert_eq!(doc.missing_fields(), vec!["title", "description"]);

        let covenant = parse_metadata(MetadataKind::Covenant, br#"{"covenant":"Be kind"}"#).unwrap();
        assert_eq!(covenant, MetadataDocument::Covenant { text: Some("Be kind".into()) });
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert_eq!(parse_metadata(MetadataKind::Dispute, b"[1,2]"), Err(ParseError::NotAnObject));
        assert!(matches!(
            parse_metadata(MetadataKind::Dispute, b"not json"),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_degraded_content_is_stored_with_null_fields() {
        let mut indexer = Indexer::new(RecordedReader::new());
        indexer.schedule_content("QmDispute", MetadataKind::Dispute);
        assert!(indexer.apply_content("QmDispute", b"\"just a string\""));

        let stored = indexer.store().dispute_metadata.get("QmDispute").unwrap();
        assert_eq!(stored.reason, None);
        assert!(indexer.pending_content().is_empty());
        assert_eq!(indexer.warnings().next().unwrap().kind, WarningKind::MetadataSchema);
    }

    #[test]
    fn test_metadata_is_immutable_per_cid() {
        let mut indexer = Indexer::new(RecordedReader::new());
        indexer.apply_content_metadata("QmP", MetadataKind::Proposal, br#"{"title":"a","description":"b"}"#);
        indexer.apply_content_metadata("QmP", MetadataKind::Proposal, br#"{"title":"changed","description":"b"}"#);
        let stored = indexer.store().proposal_metadata.get("QmP").unwrap();
        assert_eq!(stored.title.as_deref(), Some("a"));

        // Already resolved CIDs are not scheduled again
        indexer.schedule_content("QmP", MetadataKind::Proposal);
        assert!(indexer.pending_content().is_empty());
    }

    #[test]
    fn test_unscheduled_content_is_ignored() {
        let mut indexer = Indexer::new(RecordedReader::new());
        assert!(!indexer.apply_content("QmUnknown", b"{}"));
        assert_eq!(indexer.store().counts().metadata, 0);
    }
}
