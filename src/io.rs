use crate::error::{DpdError, Result};
use crate::forces::bonds::HarmonicBond;
use crate::particles::ParticleState;
use crate::profile_scope;
use crate::Real;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;

/// Everything needed to continue a run from where it stopped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub step: u64,
    pub time: Real,
    /// Thermostat variable of schemes that carry one.
    #[serde(default)]
    pub xi: Option<Real>,
    pub state: ParticleState,
    #[serde(default)]
    pub bonds: Vec<HarmonicBond>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// bincode, the default
    Binary,
    Json,
}

impl SnapshotFormat {
    /// `.json` and `.json.gz` select JSON, everything else bincode.
    pub fn from_path(path: &Path) -> Self {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let name = name.strip_suffix(".gz").unwrap_or(name);
        if name.ends_with(".json") {
            SnapshotFormat::Json
        } else {
            SnapshotFormat::Binary
        }
    }
}

fn is_gzip_path(path: &Path) -> bool {
    path.extension().map_or(false, |e| e == "gz")
}

/// Writes `snapshot` next to `path` and renames it into place, so an
/// interrupted write never truncates an existing snapshot. A `.gz` suffix
/// compresses the output.
pub fn save_snapshot<P: AsRef<Path>>(path: P, snapshot: &Snapshot) -> Result<()> {
    profile_scope!("save_snapshot");
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let format = SnapshotFormat::from_path(path);
    let tmp_path = path.with_extension({
        let mut os = path.extension().map(|e| e.to_os_string()).unwrap_or_default();
        os.push(".tmp");
        os
    });
    {
        let file = std::fs::File::create(&tmp_path)?;
        let writer = BufWriter::new(file);
        if is_gzip_path(path) {
            let mut encoder = GzEncoder::new(writer, Compression::fast());
            encode(&mut encoder, format, snapshot)?;
            let mut writer = encoder.finish()?;
            writer.flush()?;
        } else {
            let mut writer = writer;
            encode(&mut writer, format, snapshot)?;
            writer.flush()?;
        }
    }
    std::fs::rename(&tmp_path, path)?;
    log::info!(
        "saved snapshot of step {} ({} particles) to {}",
        snapshot.step,
        snapshot.state.len(),
        path.display()
    );
    Ok(())
}

fn encode<W: Write>(writer: &mut W, format: SnapshotFormat, snapshot: &Snapshot) -> Result<()> {
    match format {
        SnapshotFormat::Json => serde_json::to_writer(writer, snapshot)?,
        SnapshotFormat::Binary => bincode::serialize_into(writer, snapshot)?,
    }
    Ok(())
}

/// Reads a snapshot in any format [`save_snapshot`] writes; compression is
/// detected from the content, not the name.
pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Snapshot> {
    profile_scope!("load_snapshot");
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let bytes = match maybe_decompress_gzip(&data)? {
        Some(decoded) => decoded,
        None => data,
    };
    let snapshot = parse_snapshot_bytes(&bytes, SnapshotFormat::from_path(path))?;
    snapshot.state.validate()?;
    if let Some(bond) = snapshot
        .bonds
        .iter()
        .find(|b| b.i >= snapshot.state.len() || b.j >= snapshot.state.len())
    {
        return Err(DpdError::invariant(format!(
            "snapshot bond {}-{} names a particle beyond {}",
            bond.i,
            bond.j,
            snapshot.state.len()
        )));
    }
    Ok(snapshot)
}

fn parse_snapshot_bytes(bytes: &[u8], hint: SnapshotFormat) -> Result<Snapshot> {
    match hint {
        SnapshotFormat::Json => Ok(serde_json::from_slice(bytes)?),
        SnapshotFormat::Binary => match bincode::deserialize::<Snapshot>(bytes) {
            Ok(snapshot) => Ok(snapshot),
            // renamed JSON files still load
            Err(err) => serde_json::from_slice(bytes).map_err(|_| DpdError::from(err)),
        },
    }
}

fn maybe_decompress_gzip(data: &[u8]) -> std::io::Result<Option<Vec<u8>>> {
    if data.len() < 2 || data[0] != 0x1f || data[1] != 0x8b {
        return Ok(None);
    }

    let mut decoder = GzDecoder::new(Cursor::new(data));
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded)?;
    Ok(Some(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forces::bonds::BondBehavior;
    use crate::particles::ParticleKind;
    use crate::Vector;
    use std::path::PathBuf;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("dpd_sim_io_{}", std::process::id()))
            .join(name)
    }

    fn sample() -> Snapshot {
        let mut state = ParticleState::with_capacity(3);
        for k in 0..3 {
            let kind = ParticleKind {
                type_index: k % 2,
                molecule: 0,
                charge: if k == 1 { -1.0 } else { 0.0 },
                mass: 1.0 + k as Real,
                molar_mass: 18.0,
            };
            state.push(
                Vector::new(k as Real, 0.5, 0.25),
                Vector::new(0.1, -0.2, k as Real),
                kind,
            );
        }
        Snapshot {
            step: 42,
            time: 1.68,
            xi: Some(0.3),
            state,
            bonds: vec![HarmonicBond {
                i: 0,
                j: 1,
                rest_length: 0.5,
                force_constant: 4.0,
                behavior: BondBehavior::Repulsive,
            }],
        }
    }

    fn assert_same(a: &Snapshot, b: &Snapshot) {
        assert_eq!(a.step, b.step);
        assert_eq!(a.time, b.time);
        assert_eq!(a.xi, b.xi);
        assert_eq!(a.bonds, b.bonds);
        assert_eq!(a.state.positions(), b.state.positions());
        assert_eq!(a.state.velocities, b.state.velocities);
        assert_eq!(a.state.charges, b.state.charges);
        assert_eq!(a.state.masses, b.state.masses);
    }

    #[test]
    fn compressed_binary_snapshot_restores() {
        let path = scratch_path("state.bin.gz");
        let snapshot = sample();
        save_snapshot(&path, &snapshot).unwrap();
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);
        assert_same(&snapshot, &load_snapshot(&path).unwrap());
        assert!(!path.with_extension("gz.tmp").exists());
    }

    #[test]
    fn json_snapshot_restores() {
        let path = scratch_path("state.json");
        let snapshot = sample();
        save_snapshot(&path, &snapshot).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"step\":42"));
        assert_same(&snapshot, &load_snapshot(&path).unwrap());
    }

    #[test]
    fn format_follows_the_name() {
        assert_eq!(SnapshotFormat::from_path(Path::new("a/b.json.gz")), SnapshotFormat::Json);
        assert_eq!(SnapshotFormat::from_path(Path::new("b.bin")), SnapshotFormat::Binary);
        assert_eq!(SnapshotFormat::from_path(Path::new("b")), SnapshotFormat::Binary);
    }

    #[test]
    fn garbage_is_rejected() {
        let path = scratch_path("garbage.bin");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not a snapshot").unwrap();
        assert!(load_snapshot(&path).is_err());
    }
}
