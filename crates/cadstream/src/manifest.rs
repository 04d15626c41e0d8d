//! Versioned sector manifest parsing.
//!
//! Turns the JSON manifest of a model revision into an immutable
//! [`SectorScene`]. Parsing is pure: no I/O happens here, the caller fetches
//! the manifest however it likes.
//!
//! Two manifest formats are supported:
//!
//! - **Version 8**: detailed geometry in `indexFile`, simple geometry in
//!   `facesFile`. Payloads are self-contained, so `peripheralFiles` is ignored
//! - **Version 9**: detailed geometry in `sectorFileName`, with diagonal
//!   length hints; `facesFile` is optional
//!
//! Versions 1 to 7 are recognised but rejected as retired.

use std::collections::HashMap;
use std::path::{Component, Path};

use serde::Deserialize;
use serde_json::Value;

use crate::coords::{CdfBox, to_render_box};
use crate::error::{Error, Result, UnsupportedVersion};
use crate::metadata::{
    DetailLevel, LevelOfDetail, SectorCost, SectorId, SectorMetadata, SectorScene,
};

/// Oldest manifest version still supported.
pub const MIN_SUPPORTED_VERSION: u64 = 8;
/// Newest manifest version understood by this parser.
pub const MAX_SUPPORTED_VERSION: u64 = 9;

/// Relative slack, as a fraction of the parent diagonal, allowed when checking
/// that a child box lies inside its parent.
const CONTAINMENT_TOLERANCE: f64 = 1e-4;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[serde(default)]
    max_tree_index: u64,
    #[serde(default = "default_unit")]
    unit: String,
    sectors: Vec<Value>,
}

fn default_unit() -> String {
    "Meters".to_string()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIndexFile {
    file_name: String,
    download_size: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFacesFile {
    file_name: Option<String>,
    #[serde(default)]
    download_size: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSectorV8 {
    id: u64,
    #[serde(default)]
    parent_id: Option<i64>,
    #[serde(default)]
    path: String,
    depth: u32,
    bounding_box: CdfBox,
    #[serde(default)]
    estimated_draw_call_count: u64,
    index_file: Option<RawIndexFile>,
    faces_file: Option<RawFacesFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSectorV9 {
    id: u64,
    #[serde(default)]
    parent_id: Option<i64>,
    #[serde(default)]
    path: String,
    depth: u32,
    bounding_box: CdfBox,
    #[serde(default)]
    estimated_draw_call_count: u64,
    sector_file_name: Option<String>,
    #[serde(default)]
    download_size: u64,
    max_diagonal_length: Option<f64>,
    min_diagonal_length: Option<f64>,
    faces_file: Option<RawFacesFile>,
}

/// Parse a manifest from a JSON string.
pub fn parse_manifest_str(json: &str) -> Result<SectorScene> {
    let value: Value = serde_json::from_str(json)?;
    parse_manifest(&value)
}

/// Parse a manifest into a validated [`SectorScene`].
pub fn parse_manifest(json: &Value) -> Result<SectorScene> {
    let version = read_version(json)?;
    let raw = RawManifest::deserialize(json)
        .map_err(|e| Error::InvalidManifest(format!("manifest header: {e}")))?;

    let sectors = raw
        .sectors
        .iter()
        .enumerate()
        .map(|(index, value)| {
            let sector = if version == 8 {
                parse_sector_v8(value)
            } else {
                parse_sector_v9(value)
            };
            sector.map_err(|e| match e {
                Error::InvalidManifest(message) => {
                    Error::InvalidManifest(format!("sector at index {index}: {message}"))
                }
                other => other,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let (root, sectors) = link_tree(sectors)?;

    #[allow(clippy::cast_possible_truncation)]
    let version = version as u32;
    let scene = SectorScene::from_validated(version, raw.max_tree_index, raw.unit, root, sectors);
    tracing::info!(
        "Parsed v{} manifest: {} sectors, max depth {}, largest sector {} bytes",
        scene.version(),
        scene.len(),
        scene.max_depth(),
        scene.max_sector_size()
    );
    Ok(scene)
}

fn read_version(json: &Value) -> Result<u64> {
    let version = json
        .get("version")
        .and_then(Value::as_u64)
        .ok_or(Error::UnsupportedVersion(UnsupportedVersion::Missing))?;
    match version {
        MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION => Ok(version),
        1..MIN_SUPPORTED_VERSION => Err(Error::UnsupportedVersion(UnsupportedVersion::Retired(
            version,
        ))),
        _ => Err(Error::UnsupportedVersion(UnsupportedVersion::Unknown(
            version,
        ))),
    }
}

fn parent_from_raw(parent_id: Option<i64>) -> Result<Option<SectorId>> {
    match parent_id {
        None | Some(-1) => Ok(None),
        Some(id) => u64::try_from(id)
            .map(|id| Some(SectorId(id)))
            .map_err(|_| Error::InvalidManifest(format!("invalid parent id {id}"))),
    }
}

/// File names are resolved against the model root, so they must stay inside it.
fn checked_file_name(name: String) -> Result<String> {
    let escapes = name.is_empty()
        || name.contains('\\')
        || Path::new(&name)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
    if escapes {
        return Err(Error::InvalidManifest(format!(
            "file name {name:?} is not relative to the model"
        )));
    }
    Ok(name)
}

fn simple_level(faces: Option<RawFacesFile>) -> Result<Option<DetailLevel>> {
    let Some(RawFacesFile {
        file_name: Some(file_name),
        download_size,
    }) = faces
    else {
        return Ok(None);
    };
    Ok(Some(DetailLevel {
        lod: LevelOfDetail::Simple,
        file_name: checked_file_name(file_name)?,
        cost: SectorCost::new(download_size, 1),
    }))
}

fn parse_sector_v8(value: &Value) -> Result<SectorMetadata> {
    let raw =
        RawSectorV8::deserialize(value).map_err(|e| Error::InvalidManifest(e.to_string()))?;
    let mut detail_levels = Vec::with_capacity(2);
    detail_levels.extend(simple_level(raw.faces_file)?);
    if let Some(index) = raw.index_file {
        detail_levels.push(DetailLevel {
            lod: LevelOfDetail::Detailed,
            file_name: checked_file_name(index.file_name)?,
            cost: SectorCost::new(index.download_size, raw.estimated_draw_call_count),
        });
    }
    Ok(SectorMetadata {
        id: SectorId(raw.id),
        parent_id: parent_from_raw(raw.parent_id)?,
        path: raw.path,
        depth: raw.depth,
        bounds: to_render_box(&raw.bounding_box)?,
        children: Vec::new(),
        detail_levels,
        min_diagonal_length: None,
        max_diagonal_length: None,
    })
}

fn parse_sector_v9(value: &Value) -> Result<SectorMetadata> {
    let raw =
        RawSectorV9::deserialize(value).map_err(|e| Error::InvalidManifest(e.to_string()))?;
    let mut detail_levels = Vec::with_capacity(2);
    detail_levels.extend(simple_level(raw.faces_file)?);
    if let Some(file_name) = raw.sector_file_name {
        detail_levels.push(DetailLevel {
            lod: LevelOfDetail::Detailed,
            file_name: checked_file_name(file_name)?,
            cost: SectorCost::new(raw.download_size, raw.estimated_draw_call_count),
        });
    }
    for length in [raw.min_diagonal_length, raw.max_diagonal_length]
        .into_iter()
        .flatten()
    {
        if !length.is_finite() || length < 0.0 {
            return Err(Error::MalformedGeometry(format!(
                "sector {} has invalid diagonal length {length}",
                raw.id
            )));
        }
    }
    Ok(SectorMetadata {
        id: SectorId(raw.id),
        parent_id: parent_from_raw(raw.parent_id)?,
        path: raw.path,
        depth: raw.depth,
        bounds: to_render_box(&raw.bounding_box)?,
        children: Vec::new(),
        detail_levels,
        min_diagonal_length: raw.min_diagonal_length,
        max_diagonal_length: raw.max_diagonal_length,
    })
}

/// Index sectors by id, check the tree invariants and fill in child lists.
fn link_tree(
    sectors: Vec<SectorMetadata>,
) -> Result<(Option<SectorId>, HashMap<SectorId, SectorMetadata>)> {
    let mut by_id = HashMap::with_capacity(sectors.len());
    let mut root = None;
    for sector in sectors {
        if sector.parent_id.is_none() {
            if let Some(existing) = root {
                return Err(Error::InvalidManifest(format!(
                    "multiple root sectors: {existing} and {}",
                    sector.id
                )));
            }
            root = Some(sector.id);
        }
        let id = sector.id;
        if by_id.insert(id, sector).is_some() {
            return Err(Error::InvalidManifest(format!("duplicate sector id {id}")));
        }
    }

    if !by_id.is_empty() && root.is_none() {
        return Err(Error::InvalidManifest("manifest has no root sector".into()));
    }

    let mut links: Vec<(SectorId, SectorId)> = Vec::new();
    for sector in by_id.values() {
        let Some(parent_id) = sector.parent_id else {
            continue;
        };
        let parent = by_id.get(&parent_id).ok_or_else(|| {
            Error::InvalidManifest(format!(
                "sector {} references missing parent {parent_id}",
                sector.id
            ))
        })?;
        if parent.depth.checked_add(1) != Some(sector.depth) {
            return Err(Error::InvalidManifest(format!(
                "sector {} has depth {} but its parent {parent_id} has depth {}",
                sector.id, sector.depth, parent.depth
            )));
        }
        let tolerance = CONTAINMENT_TOLERANCE * parent.bounds.diagonal().max(1.0);
        if !parent.bounds.contains_box(&sector.bounds, tolerance) {
            return Err(Error::InvalidManifest(format!(
                "sector {} is not contained in its parent {parent_id}",
                sector.id
            )));
        }
        links.push((parent_id, sector.id));
    }

    links.sort_unstable();
    for (parent_id, child_id) in links {
        if let Some(parent) = by_id.get_mut(&parent_id) {
            parent.children.push(child_id);
        }
    }

    Ok((root, by_id))
}
