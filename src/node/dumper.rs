use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Archives the node home before each hard reset so a run can be replayed.
pub struct PeriodDumper {
    dump_dir: PathBuf,
    node_name: String,
    resets: u32,
}

impl PeriodDumper {
    /// Clears whatever a previous run left in `dump_dir`.
    pub fn new(dump_dir: impl Into<PathBuf>, node_id: Option<u16>) -> std::io::Result<Self> {
        let dump_dir = dump_dir.into();
        if dump_dir.is_dir() {
            fs::remove_dir_all(&dump_dir)?;
        }
        fs::create_dir_all(&dump_dir)?;

        Ok(Self {
            dump_dir,
            node_name: format!("node{}", node_id.unwrap_or(0)),
            resets: 0,
        })
    }

    /// Number of periods dumped so far.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Writes `<dump_dir>/period_<n>/node<ID>.tar.gz`. Failures are logged only.
    pub fn dump_period(&mut self, home: &Path) {
        let store_dir = self.dump_dir.join(format!("period_{}", self.resets));
        match self.archive(home, &store_dir) {
            Ok(path) => info!(path = %path.display(), "Dumped data for period {}", self.resets),
            Err(e) => warn!("Error occurred while dumping data for period {}: {}", self.resets, e),
        }
        self.resets += 1;
    }

    fn archive(&self, home: &Path, store_dir: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(store_dir)?;
        let path = store_dir.join(format!("{}.tar.gz", self.node_name));
        let file = File::create(&path)?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        builder.append_dir_all(&self.node_name, home)?;
        builder.into_inner()?.finish()?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    #[test]
    fn new_clears_previous_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let dump_dir = dir.path().join("dumps");
        fs::create_dir_all(dump_dir.join("period_9")).unwrap();

        let dumper = PeriodDumper::new(&dump_dir, Some(1)).unwrap();
        assert_eq!(dumper.resets(), 0);
        assert!(!dump_dir.join("period_9").exists());
    }

    #[test]
    fn dump_period_archives_home() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        fs::create_dir_all(home.join("data")).unwrap();
        fs::write(home.join("data/marker"), "height-42").unwrap();

        let mut dumper = PeriodDumper::new(dir.path().join("dumps"), Some(3)).unwrap();
        dumper.dump_period(&home);
        dumper.dump_period(&home);
        assert_eq!(dumper.resets(), 2);

        let archive = dir.path().join("dumps/period_1/node3.tar.gz");
        let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive).unwrap()));
        let names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n == "node3/data/marker"));
    }

    #[test]
    fn missing_home_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut dumper = PeriodDumper::new(dir.path().join("dumps"), None).unwrap();
        dumper.dump_period(&dir.path().join("nope"));
        assert_eq!(dumper.resets(), 1);
    }
}
