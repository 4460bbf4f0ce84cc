use std::collections::{HashMap, HashSet};

use cloudvault_core::{CloudVaultError, RemoteFolder, RemoteId, RemoteStore};

use super::paths::{join_relative, segments, validate_name};

/// Remote folder hierarchy keyed by relative name path ("Docs/Reports").
///
/// Folder identity between the two sides is the name chain, not a stored id,
/// so sibling folders sharing a name collapse onto the first one listed.
#[derive(Debug, Default, Clone)]
pub struct RemoteTree {
    by_path: HashMap<String, RemoteId>,
}

impl RemoteTree {
    /// Lists the whole folder tree depth-first starting at the root.
    pub async fn fetch(store: &dyn RemoteStore) -> Result<Self, CloudVaultError> {
        let mut folders = Vec::new();
        let mut seen = HashSet::new();
        let mut pending: Vec<Option<RemoteId>> = vec![None];
        while let Some(parent) = pending.pop() {
            let children = store.list_folders(parent.as_ref()).await?;
            // Reverse so the first child is listed (and descended into) first.
            for child in children.into_iter().rev() {
                if !seen.insert(child.id.clone()) {
                    continue;
                }
                pending.push(Some(child.id.clone()));
                folders.push(child);
            }
        }
        Ok(Self::from_folders(folders))
    }

    pub fn from_folders(folders: Vec<RemoteFolder>) -> Self {
        let by_id: HashMap<&RemoteId, &RemoteFolder> =
            folders.iter().map(|folder| (&folder.id, folder)).collect();
        let mut by_path = HashMap::new();
        for folder in &folders {
            match relative_path(folder, &by_id) {
                Ok(path) => {
                    by_path.entry(path).or_insert_with(|| folder.id.clone());
                }
                Err(reason) => {
                    tracing::warn!(id = %folder.id, name = %folder.name, reason, "skipping remote folder");
                }
            }
        }
        Self { by_path }
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    /// `(relative path, folder id)` pairs, parents before children.
    pub fn paths(&self) -> Vec<(&str, &RemoteId)> {
        let mut paths: Vec<_> = self
            .by_path
            .iter()
            .map(|(path, id)| (path.as_str(), id))
            .collect();
        paths.sort_by(|a, b| a.0.cmp(b.0));
        paths
    }

    /// Resolves `relative_dir` to a folder id, creating each missing segment
    /// remotely from the root down. `None` is the root.
    pub async fn ensure_path(
        &mut self,
        store: &dyn RemoteStore,
        relative_dir: &str,
    ) -> Result<Option<RemoteId>, CloudVaultError> {
        let mut parent: Option<RemoteId> = None;
        let mut prefix = String::new();
        for segment in segments(relative_dir) {
            prefix = join_relative(&prefix, segment);
            if let Some(existing) = self.by_path.get(&prefix) {
                parent = Some(existing.clone());
                continue;
            }
            let id = store.create_folder(segment, parent.as_ref()).await?;
            tracing::info!(path = %prefix, %id, "created remote folder");
            self.by_path.insert(prefix.clone(), id.clone());
            parent = Some(id);
        }
        Ok(parent)
    }
}

/// Joins the name chain from the root down to `folder`. A folder is
/// unreachable when any name on the chain is unusable, which drops its
/// whole subtree.
fn relative_path(
    folder: &RemoteFolder,
    by_id: &HashMap<&RemoteId, &RemoteFolder>,
) -> Result<String, &'static str> {
    let mut names = Vec::new();
    let mut visited = HashSet::from([&folder.id]);
    let mut current = folder;
    loop {
        let name = validate_name(&current.name).map_err(|_| "unusable name in folder chain")?;
        names.push(name);
        // A parent id that is not in the listing is treated like the root.
        let Some(parent) = current.parent_id.as_ref().and_then(|id| by_id.get(id).copied())
        else {
            break;
        };
        if !visited.insert(&parent.id) {
            return Err("cyclic parent chain");
        }
        current = parent;
    }
    names.reverse();
    Ok(names.join("/"))
}
