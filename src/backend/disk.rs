use crate::domain::model::InstanceInfo;
use std::fs;
use std::path::{Path, PathBuf};

/// Where MuMu Player 12 keeps its virtual machines on a typical Windows install.
pub const DEFAULT_INSTANCE_ROOTS: [&str; 9] = [
    r"C:\Program Files\Netease\MuMuPlayerGlobal-12.0\vms",
    r"C:\Program Files\Netease\MuMuPlayer-12.0\vms",
    r"C:\Program Files (x86)\Netease\MuMuPlayerGlobal-12.0\vms",
    r"C:\Program Files (x86)\Netease\MuMuPlayer-12.0\vms",
    r"C:\Users\Public\Documents\MuMu\vms",
    r"C:\ProgramData\MuMu\vms",
    r"D:\Program Files\Netease\MuMuPlayerGlobal-12.0\vms",
    r"D:\Program Files\Netease\MuMuPlayer-12.0\vms",
    r"D:\MuMu\vms",
];

pub fn default_instance_roots() -> Vec<PathBuf> {
    DEFAULT_INSTANCE_ROOTS.iter().map(PathBuf::from).collect()
}

fn candidate_names(index: u32) -> [String; 6] {
    [
        format!("MuMuPlayerGlobal-12.0-{}", index),
        format!("MuMuPlayer-12.0-{}", index),
        format!("MuMu{}", index),
        format!("vm_{}", index),
        format!("instance_{}", index),
        index.to_string(),
    ]
}

pub fn find_instance_path(index: u32, roots: &[PathBuf]) -> Option<PathBuf> {
    roots
        .iter()
        .filter(|root| root.is_dir())
        .flat_map(|root| candidate_names(index).into_iter().map(move |name| root.join(name)))
        .find(|candidate| candidate.exists())
}

/// Total size of all files below `path`; unreadable entries are skipped.
pub fn folder_size(path: &Path) -> u64 {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(kind) if kind.is_dir() => folder_size(&entry.path()),
            Ok(kind) if kind.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            _ => 0,
        })
        .sum()
}

pub fn format_size(size_bytes: u64) -> String {
    if size_bytes == 0 {
        return "0MB".to_string();
    }

    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return if unit == "B" {
                format!("{}{}", size as u64, unit)
            } else {
                format!("{:.1}{}", size, unit)
            };
        }
        size /= 1024.0;
    }
    format!("{:.1}PB", size)
}

/// Fills `disk_usage` / `disk_size_bytes`. A size reported by MuMuManager wins;
/// otherwise the instance folder is measured.
pub fn apply_disk_usage(info: &mut InstanceInfo, roots: &[PathBuf]) {
    if info.disk_size_bytes > 0 {
        info.disk_usage = Some(format_size(info.disk_size_bytes));
        return;
    }

    if info.path.is_none() {
        info.path = find_instance_path(info.index, roots).map(|p| p.to_string_lossy().to_string());
    }

    match info.path.as_deref().map(Path::new).filter(|p| p.exists()) {
        Some(path) => {
            let bytes = folder_size(path);
            tracing::debug!("💾 Instance {}: {} -> {}", info.index, path.display(), format_size(bytes));
            info.disk_size_bytes = bytes;
            info.disk_usage = Some(format_size(bytes));
        }
        None => {
            info.disk_size_bytes = 0;
            info.disk_usage = Some("0MB".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0MB");
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(1536), "1.5KB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.0GB");
        assert_eq!(format_size(3 * 1024u64.pow(5)), "3.0PB");
    }

    #[test]
    fn test_find_path_and_measure() {
        let root = TempDir::new().unwrap();
        let vm = root.path().join("MuMuPlayerGlobal-12.0-2");
        fs::create_dir_all(vm.join("nested")).unwrap();
        fs::write(vm.join("a.img"), vec![0u8; 1000]).unwrap();
        fs::write(vm.join("nested").join("b.img"), vec![0u8; 24]).unwrap();

        let roots = vec![root.path().to_path_buf()];
        assert_eq!(find_instance_path(2, &roots), Some(vm.clone()));
        assert_eq!(find_instance_path(3, &roots), None);
        assert_eq!(folder_size(&vm), 1024);

        let mut info = InstanceInfo::new(2);
        apply_disk_usage(&mut info, &roots);
        assert_eq!(info.disk_size_bytes, 1024);
        assert_eq!(info.disk_usage.as_deref(), Some("1.0KB"));
    }

    #[test]
    fn test_reported_size_wins() {
        let mut info = InstanceInfo::new(9);
        info.disk_size_bytes = 1024 * 1024;
        apply_disk_usage(&mut info, &[]);
        assert_eq!(info.disk_usage.as_deref(), Some("1.0MB"));

        let mut missing = InstanceInfo::new(10);
        apply_disk_usage(&mut missing, &[]);
        assert_eq!(missing.disk_usage.as_deref(), Some("0MB"));
        assert_eq!(missing.disk_size_bytes, 0);
    }
}
