//! Shared path manipulation utilities.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Make a path absolute without touching the filesystem.
///
/// Relative paths are joined onto the current directory and `.`/`..`
/// components are resolved syntactically. Symlinks are not resolved, so the
/// result stays comparable with paths reported by `vmrun list`.
pub fn absolutize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };
    normalize_syntactic(&absolute)
}

/// Resolve a reference found inside a descriptor against the descriptor's
/// own directory. Absolute references are returned unchanged.
pub fn resolve_sibling(descriptor: &Path, reference: &str) -> PathBuf {
    let base = descriptor.parent().unwrap_or_else(|| Path::new(""));
    base.join(reference)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_path_is_normalized_syntactically() {
        let input = Path::new("/storage/VMS/./ubuntu/../win10/win10.vmx");
        assert_eq!(
            absolutize(input),
            PathBuf::from("/storage/VMS/win10/win10.vmx")
        );
    }

    #[test]
    fn relative_path_is_joined_onto_cwd() {
        let cwd = env::current_dir().unwrap();
        let resolved = absolutize(Path::new("vms/a.vmx"));
        assert_eq!(resolved, normalize_syntactic(&cwd.join("vms/a.vmx")));
        assert!(resolved.is_absolute());
    }

    #[cfg(unix)]
    #[test]
    fn parent_dir_never_climbs_above_root() {
        assert_eq!(absolutize(Path::new("/../../vms/a.vmx")), Path::new("/vms/a.vmx"));
        assert_eq!(absolutize(Path::new("/vms/..")), Path::new("/"));
    }

    #[test]
    fn sibling_reference_resolves_against_descriptor_dir() {
        let descriptor = Path::new("/vms/ubuntu/ubuntu.vmx");
        assert_eq!(
            resolve_sibling(descriptor, "ubuntu.vmdk"),
            PathBuf::from("/vms/ubuntu/ubuntu.vmdk")
        );
        assert_eq!(
            resolve_sibling(descriptor, "/shared/disks/base.vmdk"),
            PathBuf::from("/shared/disks/base.vmdk")
        );
    }
}
