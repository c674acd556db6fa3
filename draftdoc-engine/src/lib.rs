pub mod command;
mod engine;
pub mod events;
mod history;
pub mod pick;
pub mod selection;
pub mod session;
pub mod snap;
mod spatial;
pub mod text_layout;

pub use engine::{Engine, EngineOptions, HistoryMeta};

pub mod errors {
    use draftdoc_core::document::{DocumentError, EntityId, LayerId};
    use draftdoc_core::shape::EntityKind;
    use draftdoc_core::text::TextEditError;
    use draftdoc_io::SnapshotError;
    use thiserror::Error;

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum EngineError {
        #[error("entity {0} not found")]
        EntityNotFound(EntityId),
        #[error("layer {0} not found")]
        LayerNotFound(LayerId),
        #[error("non-finite {what}")]
        NonFinite { what: &'static str },
        #[error("{op} does not apply to {kind} entities")]
        UnsupportedKind { op: &'static str, kind: EntityKind },
        #[error("selection is empty")]
        EmptySelection,
        #[error("a transform session is active")]
        SessionActive,
        #[error("no transform session is active")]
        NoActiveSession,
        #[error("entity {id} has no sub-target {index}")]
        InvalidSubTarget { id: EntityId, index: u32 },
        #[error(transparent)]
        InvalidTextRange(#[from] TextEditError),
        #[error(transparent)]
        Document(#[from] DocumentError),
        #[error(transparent)]
        Snapshot(#[from] SnapshotError),
    }
}
