use std::collections::{HashMap, HashSet};

use draftdoc_core::document::{Document, DocumentError, EntityId, EntityState};
use draftdoc_core::history::HistoryLog;
use draftdoc_core::style::StyleOverride;
use tracing::debug;

use crate::SnapshotError;
use crate::container::{Container, Section, SectionTag, read_container, write_container};
use crate::history::{decode_history, encode_history};
use crate::layout::{CURRENT_VERSION, Layout};
use crate::sections::{
    decode_entities, decode_ids, decode_layers, decode_next_id, decode_styles, decode_texts,
    encode_entities, encode_ids, encode_layers, encode_next_id, encode_styles, encode_texts,
};

/// Fully validated staging result of a load. Nothing live is touched until
/// the caller swaps this in.
#[derive(Debug, Clone)]
pub struct SnapshotData {
    pub document: Document,
    /// In the order it was saved.
    pub selection: Vec<EntityId>,
    pub history: HistoryLog,
}

impl SnapshotData {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            selection: Vec::new(),
            history: HistoryLog::default(),
        }
    }
}

/// Encodes the document at the current format version.
pub fn serialize(
    document: &Document,
    selection: &[EntityId],
    history: &HistoryLog,
) -> Result<Vec<u8>, SnapshotError> {
    serialize_with_layout(Layout::CURRENT, document, selection, history)
}

/// Encodes with an explicit record layout; older layouts exist for fixtures
/// and migration round trips.
pub fn serialize_with_layout(
    layout: Layout,
    document: &Document,
    selection: &[EntityId],
    history: &HistoryLog,
) -> Result<Vec<u8>, SnapshotError> {
    let states = document.entity_states();
    let sections = vec![
        Section::new(SectionTag::LAYR, encode_layers(&document.layer_list())?),
        Section::new(SectionTag::ENTS, encode_entities(&states, layout)?),
        Section::new(SectionTag::TEXT, encode_texts(&states, layout)?),
        Section::new(SectionTag::STYL, encode_styles(&states)?),
        Section::new(SectionTag::ORDR, encode_ids(document.draw_order())?),
        Section::new(SectionTag::SELC, encode_ids(selection)?),
        Section::new(SectionTag::HIST, encode_history(history)?),
        Section::new(SectionTag::NIDX, encode_next_id(document.next_id())),
    ];
    let bytes = write_container(layout.version, &sections)?;
    debug!(
        version = layout.version,
        entities = states.len(),
        bytes = bytes.len(),
        "serialized snapshot"
    );
    Ok(bytes)
}

/// Parses and validates `bytes` completely. Any error means nothing usable
/// was produced.
pub fn deserialize(bytes: &[u8]) -> Result<SnapshotData, SnapshotError> {
    let container = read_container(bytes)?;
    let layout = Layout::for_version(container.version).ok_or(SnapshotError::UnsupportedVersion {
        found: container.version,
        expected: CURRENT_VERSION,
    })?;
    let required = |tag: SectionTag| {
        container
            .section(tag)
            .map(|section| section.payload.as_slice())
            .ok_or(SnapshotError::MissingSection { tag })
    };
    let optional = |tag: SectionTag| {
        container
            .section(tag)
            .map(|section| section.payload.as_slice())
    };

    let layers = decode_layers(required(SectionTag::LAYR)?)?;
    let mut entities = decode_entities(required(SectionTag::ENTS)?, layout)?;
    if let Some(payload) = optional(SectionTag::TEXT) {
        entities.extend(decode_texts(payload, layout)?);
    }
    let draw_order = decode_ids(SectionTag::ORDR, required(SectionTag::ORDR)?)?;
    let next_id = decode_next_id(required(SectionTag::NIDX)?)?;
    let styles = match optional(SectionTag::STYL) {
        Some(payload) => decode_styles(payload)?,
        None => Vec::new(),
    };
    let selection = match optional(SectionTag::SELC) {
        Some(payload) => decode_ids(SectionTag::SELC, payload)?,
        None => Vec::new(),
    };
    let history = match optional(SectionTag::HIST) {
        Some(payload) => decode_history(payload)?,
        None => HistoryLog::default(),
    };

    apply_styles(&mut entities, styles)?;
    entities.sort_by_key(|state| state.id);
    let document = Document::from_parts(layers, entities, draw_order, next_id)
        .map_err(document_error)?;
    check_selection(&document, &selection)?;

    debug!(
        version = container.version,
        entities = document.len(),
        history = history.entries.len(),
        "decoded snapshot"
    );
    Ok(SnapshotData {
        document,
        selection,
        history,
    })
}

/// Reads only the framing, for tools that inspect or re-slice containers.
pub fn read_frame(bytes: &[u8]) -> Result<Container, SnapshotError> {
    read_container(bytes)
}

fn apply_styles(
    entities: &mut [EntityState],
    styles: Vec<(EntityId, StyleOverride)>,
) -> Result<(), SnapshotError> {
    let mut by_id: HashMap<EntityId, usize> = HashMap::with_capacity(entities.len());
    for (i, state) in entities.iter().enumerate() {
        by_id.insert(state.id, i);
    }
    for (id, style) in styles {
        let slot = by_id.get(&id).copied().ok_or_else(|| {
            SnapshotError::malformed(SectionTag::STYL, format!("override for unknown entity {id}"))
        })?;
        let state = &mut entities[slot];
        if state.style.is_some() {
            return Err(SnapshotError::malformed(
                SectionTag::STYL,
                format!("entity {id} has two overrides"),
            ));
        }
        state.style = Some(style);
    }
    Ok(())
}

fn check_selection(document: &Document, selection: &[EntityId]) -> Result<(), SnapshotError> {
    let mut seen = HashSet::with_capacity(selection.len());
    for id in selection {
        if !document.contains(*id) {
            return Err(SnapshotError::malformed(
                SectionTag::SELC,
                format!("selection names unknown entity {id}"),
            ));
        }
        if !seen.insert(*id) {
            return Err(SnapshotError::malformed(
                SectionTag::SELC,
                format!("entity {id} is selected twice"),
            ));
        }
    }
    Ok(())
}

fn document_error(err: DocumentError) -> SnapshotError {
    let tag = match err {
        DocumentError::DuplicateLayer(_) => SectionTag::LAYR,
        DocumentError::DrawOrderMismatch => SectionTag::ORDR,
        _ => SectionTag::ENTS,
    };
    SnapshotError::malformed(tag, err.to_string())
}
