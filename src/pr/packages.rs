use std::collections::BTreeSet;

use crate::config::MonorepoConfig;

/// Package id for files that belong to no workspace package.
pub const ROOT_PACKAGE: &str = "root";

/// Top-level directories whose children are treated as packages.
const WORKSPACE_DIRS: [&str; 3] = ["apps", "packages", "libs"];

/// Map file paths to the logical monorepo packages they belong to.
///
/// Explicit `package_path_map` prefixes win (longest prefix first), then
/// `apps/*`, `packages/*` and `libs/*` directories, then [`ROOT_PACKAGE`].
/// The result is sorted and de-duplicated.
pub fn map_files_to_packages<S: AsRef<str>>(files: &[S], config: &MonorepoConfig) -> Vec<String> {
    let packages: BTreeSet<String> = files
        .iter()
        .map(|file| package_for(file.as_ref(), config))
        .collect();
    packages.into_iter().collect()
}

fn package_for(path: &str, config: &MonorepoConfig) -> String {
    let mapped = config
        .package_path_map
        .iter()
        .filter(|(prefix, _)| has_path_prefix(path, prefix))
        .max_by_key(|(prefix, _)| prefix.len());
    if let Some((_, package)) = mapped {
        return package.clone();
    }

    let mut parts = path.split('/');
    if let (Some(dir), Some(name)) = (parts.next(), parts.next()) {
        if WORKSPACE_DIRS.contains(&dir) && !name.is_empty() {
            return format!("{}/{}", dir, name);
        }
    }

    ROOT_PACKAGE.to_string()
}

fn has_path_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// True when a package set can match anything: it is empty, touches the
/// repository root, or touches a shared package.
pub fn is_unscoped(packages: &[String], config: &MonorepoConfig) -> bool {
    packages.is_empty()
        || packages
            .iter()
            .any(|p| p == ROOT_PACKAGE || config.shared_packages.contains(p))
}
