// Copyright 2024 The rbldns developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The reload controller: file-watched, debounced, file-scoped zone
//! rebuilds.
//!
//! The controller watches the union of all zone data files and ACL
//! files. A filesystem event schedules a rebuild after a debounce
//! delay; events arriving within the window coalesce, keyed by the most
//! recent path. When the timer fires, only the zones referencing the
//! changed file are rebuilt. The rebuild happens outside the registry
//! lock and the finished zone is swapped in whole; a zone that fails
//! to rebuild keeps serving its previous data and is retried on the
//! next event.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::zone::{self, Registry, ZoneDefaults, ZoneSpec};

////////////////////////////////////////////////////////////////////////
// CONFIGURATION DIFFS                                                //
////////////////////////////////////////////////////////////////////////

/// What changed between two configurations, by zone name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
    pub server_changed: bool,
}

impl ConfigDiff {
    /// Computes the zone-level diff between two spec lists.
    /// `server_changed` is supplied by the caller, which knows the
    /// server section.
    pub fn between(old: &[ZoneSpec], new: &[ZoneSpec], server_changed: bool) -> Self {
        let mut diff = Self {
            server_changed,
            ..Self::default()
        };
        for spec in new {
            match old.iter().find(|old_spec| old_spec.name == spec.name) {
                None => diff.added.push(spec.name.clone()),
                Some(old_spec) if old_spec != spec => diff.updated.push(spec.name.clone()),
                Some(_) => {}
            }
        }
        for spec in old {
            if !new.iter().any(|new_spec| new_spec.name == spec.name) {
                diff.removed.push(spec.name.clone());
            }
        }
        diff
    }

    /// Whether the diff carries no zone changes.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////
// THE RELOAD CONTROLLER                                              //
////////////////////////////////////////////////////////////////////////

/// Watches zone files and rebuilds the affected zones on change.
pub struct ReloadController {
    registry: Arc<Registry>,
    defaults: ZoneDefaults,
    specs: Mutex<Vec<ZoneSpec>>,
    debounce: Duration,
    timer: Mutex<TimerState>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    shutdown: AtomicBool,
}

/// Debounce bookkeeping. Each scheduled event bumps the generation;
/// a timer whose generation is stale was superseded and does nothing.
#[derive(Default)]
struct TimerState {
    generation: u64,
    pending: Option<PathBuf>,
}

impl ReloadController {
    /// Creates a controller for `registry`, rebuilt from `specs` with
    /// `defaults`. The filesystem watcher starts separately with
    /// [`ReloadController::start_watching`].
    pub fn new(
        registry: Arc<Registry>,
        defaults: ZoneDefaults,
        specs: Vec<ZoneSpec>,
        debounce: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            defaults,
            specs: Mutex::new(specs),
            debounce,
            timer: Mutex::new(TimerState::default()),
            watcher: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Starts watching the union of all zone data files and ACL files.
    pub fn start_watching(self: &Arc<Self>) -> notify::Result<()> {
        let watcher = self.make_watcher()?;
        *self.watcher.lock().unwrap() = Some(watcher);
        info!("zone file monitoring enabled (debounce {:?})", self.debounce);
        Ok(())
    }

    fn make_watcher(self: &Arc<Self>) -> notify::Result<RecommendedWatcher> {
        let controller = Arc::downgrade(self);
        let mut watcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                let controller = match controller.upgrade() {
                    Some(controller) => controller,
                    None => return,
                };
                match event {
                    Ok(event)
                        if matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_),
                        ) =>
                    {
                        for path in event.paths {
                            debug!("detected file change: {}", path.display());
                            controller.schedule(path);
                        }
                    }
                    Ok(_) => {}
                    Err(err) => warn!("file watcher error: {}", err),
                }
            })?;

        for file in self.watched_files() {
            match watcher.watch(&file, RecursiveMode::NonRecursive) {
                Ok(()) => debug!("watching file: {}", file.display()),
                Err(err) => warn!("failed to watch {}: {}", file.display(), err),
            }
        }
        Ok(watcher)
    }

    /// The union of all files the current specs reference.
    fn watched_files(&self) -> Vec<PathBuf> {
        let specs = self.specs.lock().unwrap();
        let mut files = BTreeSet::new();
        for spec in specs.iter() {
            files.extend(spec.files.iter().cloned());
            if let Some(acl_file) = &spec.acl_file {
                files.insert(acl_file.clone());
            }
        }
        files.into_iter().collect()
    }

    /// Schedules a debounced rebuild for `path`. Later events within
    /// the window supersede earlier ones.
    fn schedule(self: &Arc<Self>, path: PathBuf) {
        let generation = {
            let mut timer = self.timer.lock().unwrap();
            timer.generation += 1;
            timer.pending = Some(path);
            timer.generation
        };

        let controller = self.clone();
        let debounce = self.debounce;
        let spawned = thread::Builder::new()
            .name("reload timer".to_owned())
            .spawn(move || {
                thread::sleep(debounce);
                controller.fire(generation);
            });
        if let Err(err) = spawned {
            error!("failed to start reload timer: {}", err);
        }
    }

    /// The timer callback: rebuild for the pending path unless this
    /// timer was superseded or shutdown has begun.
    fn fire(&self, generation: u64) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let path = {
            let mut timer = self.timer.lock().unwrap();
            if timer.generation != generation {
                return;
            }
            timer.pending.take()
        };
        if let Some(path) = path {
            self.rebuild_for_file(&path);
        }
    }

    /// Rebuilds every zone whose file list contains `path` or whose
    /// ACL file is `path`. Other zones are untouched.
    pub fn rebuild_for_file(&self, path: &Path) {
        let affected: Vec<ZoneSpec> = {
            let specs = self.specs.lock().unwrap();
            specs
                .iter()
                .filter(|spec| {
                    spec.files.iter().any(|file| file == path)
                        || spec.acl_file.as_deref() == Some(path)
                })
                .cloned()
                .collect()
        };
        if affected.is_empty() {
            debug!("no zones reference {}", path.display());
            return;
        }

        info!(
            "reloading {} zone(s) for changed file {}",
            affected.len(),
            path.display(),
        );
        for spec in &affected {
            self.rebuild_zone(spec);
        }
    }

    /// Rebuilds every configured zone (the SIGHUP path).
    pub fn reload_all(&self) {
        let specs: Vec<ZoneSpec> = self.specs.lock().unwrap().clone();
        for spec in &specs {
            self.rebuild_zone(spec);
        }
    }

    /// Builds a fresh zone outside the registry lock and swaps it in.
    /// On failure the previous zone keeps serving.
    fn rebuild_zone(&self, spec: &ZoneSpec) {
        match zone::build(spec, &self.defaults) {
            Ok(zone) => {
                let entries = zone.dataset().count();
                self.registry.replace(zone);
                info!("zone {} reloaded ({} entries)", spec.name, entries);
            }
            Err(err) => {
                error!(
                    "failed to reload zone {}: {} (keeping existing zone)",
                    spec.name, err,
                );
            }
        }
    }

    /// Applies a configuration change: removes removed zones, loads
    /// added zones, rebuilds updated zones, and reconciles the watch
    /// list with the new file set. Bind-address changes are noted but
    /// require a process restart.
    pub fn apply_config_change(self: &Arc<Self>, new_specs: Vec<ZoneSpec>, diff: &ConfigDiff) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }

        for name in &diff.removed {
            if self.registry.remove(name).is_some() {
                info!("zone {} unloaded", name);
            }
        }

        for name in diff.added.iter().chain(diff.updated.iter()) {
            match new_specs.iter().find(|spec| &spec.name == name) {
                Some(spec) => self.rebuild_zone(spec),
                None => error!("zone {} not found in the new configuration", name),
            }
        }

        if diff.server_changed {
            info!("server configuration changed; bind address changes require a restart");
        }

        *self.specs.lock().unwrap() = new_specs;
        self.rewatch();
    }

    /// Replaces the watcher with one covering the current file set.
    fn rewatch(self: &Arc<Self>) {
        let mut guard = self.watcher.lock().unwrap();
        if guard.is_none() {
            // Watching was never enabled.
            return;
        }
        match self.make_watcher() {
            Ok(watcher) => *guard = Some(watcher),
            Err(err) => {
                warn!("failed to restart file watcher: {}", err);
                *guard = None;
            }
        }
    }

    /// Stops the watcher and disarms any pending timer. Timer callbacks
    /// already in flight observe the flag and leave the registry alone.
    pub fn shut_down(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        *self.watcher.lock().unwrap() = None;
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::dataset::Kind;
    use crate::message::qtype;

    fn spec_named(name: &str, file: PathBuf) -> ZoneSpec {
        ZoneSpec {
            name: name.to_owned(),
            kind: Kind::Ip4Trie,
            files: vec![file],
            acl_file: None,
            acl_rules: None,
            ns: Vec::new(),
            soa: None,
        }
    }

    fn controller_with(
        specs: Vec<ZoneSpec>,
        debounce: Duration,
    ) -> (Arc<Registry>, Arc<ReloadController>) {
        let registry = Arc::new(Registry::new());
        for spec in &specs {
            let _ = registry.replace(zone::build(spec, &ZoneDefaults::default()).unwrap());
        }
        let controller = ReloadController::new(
            registry.clone(),
            ZoneDefaults::default(),
            specs,
            debounce,
        );
        (registry, controller)
    }

    fn query_a(registry: &Registry, qname: &str) -> bool {
        registry
            .find(qname)
            .and_then(|zone| {
                let inner = &qname[..qname.len() - zone.name().len()];
                zone.dataset().query(inner.trim_end_matches('.'), qtype::A)
            })
            .is_some()
    }

    #[test]
    fn config_diffs_classify_zone_changes() {
        let old = vec![
            spec_named("kept.local", PathBuf::from("a")),
            spec_named("dropped.local", PathBuf::from("b")),
            spec_named("changed.local", PathBuf::from("c")),
        ];
        let mut changed = spec_named("changed.local", PathBuf::from("c"));
        changed.ns = vec!["ns1.example.com".to_owned()];
        let new = vec![
            spec_named("kept.local", PathBuf::from("a")),
            changed,
            spec_named("fresh.local", PathBuf::from("d")),
        ];

        let diff = ConfigDiff::between(&old, &new, false);
        assert_eq!(diff.added, vec!["fresh.local".to_owned()]);
        assert_eq!(diff.removed, vec!["dropped.local".to_owned()]);
        assert_eq!(diff.updated, vec!["changed.local".to_owned()]);
        assert!(!diff.is_empty());

        assert!(ConfigDiff::between(&old, &old, false).is_empty());
    }

    #[test]
    fn rebuild_for_file_swaps_only_the_affected_zone() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "192.0.2.0/24").unwrap();
        file.flush().unwrap();

        let (registry, controller) = controller_with(
            vec![spec_named("bl.local", file.path().to_path_buf())],
            Duration::from_millis(10),
        );
        assert!(query_a(&registry, "5.2.0.192.bl.local."));

        // Rewrite the file so the range is gone.
        let mut replaced = std::fs::File::create(file.path()).unwrap();
        writeln!(replaced, "198.51.100.0/24").unwrap();
        replaced.flush().unwrap();

        controller.rebuild_for_file(file.path());
        assert!(!query_a(&registry, "5.2.0.192.bl.local."));
        assert!(query_a(&registry, "9.100.51.198.bl.local."));
    }

    #[test]
    fn a_failed_rebuild_keeps_the_old_zone() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "192.0.2.0/24\n").unwrap();
        let path = file.path().to_path_buf();

        let (registry, controller) = controller_with(
            vec![spec_named("bl.local", path.clone())],
            Duration::from_millis(10),
        );
        assert!(query_a(&registry, "5.2.0.192.bl.local."));

        // Remove the file: the rebuild fails and the old data serves.
        drop(file);
        controller.rebuild_for_file(&path);
        assert!(query_a(&registry, "5.2.0.192.bl.local."));
    }

    #[test]
    fn scheduled_rebuilds_debounce_and_respect_shutdown() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "192.0.2.0/24\n").unwrap();
        let path = file.path().to_path_buf();

        let (registry, controller) = controller_with(
            vec![spec_named("bl.local", path.clone())],
            Duration::from_millis(25),
        );

        std::fs::write(&path, "198.51.100.0/24\n").unwrap();
        controller.schedule(path.clone());
        controller.schedule(path.clone());
        thread::sleep(Duration::from_millis(250));
        assert!(query_a(&registry, "9.100.51.198.bl.local."));

        // After shutdown, a pending timer leaves the registry alone.
        std::fs::write(&path, "192.0.2.0/24\n").unwrap();
        controller.schedule(path);
        controller.shut_down();
        thread::sleep(Duration::from_millis(250));
        assert!(!query_a(&registry, "5.2.0.192.bl.local."));
    }

    #[test]
    fn config_changes_add_replace_and_remove_zones() {
        let file_a = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file_a.path(), "192.0.2.0/24\n").unwrap();
        let file_b = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file_b.path(), "198.51.100.0/24\n").unwrap();

        let old_specs = vec![spec_named("old.local", file_a.path().to_path_buf())];
        let (registry, controller) = controller_with(old_specs.clone(), Duration::from_millis(10));

        let new_specs = vec![spec_named("new.local", file_b.path().to_path_buf())];
        let diff = ConfigDiff::between(&old_specs, &new_specs, false);
        controller.apply_config_change(new_specs, &diff);

        assert!(registry.find("5.2.0.192.old.local.").is_none());
        assert!(query_a(&registry, "9.100.51.198.new.local."));
    }
}
