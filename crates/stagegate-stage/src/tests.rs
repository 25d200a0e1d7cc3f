use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context};
use stagegate_core::{InstalledPackage, JsonInventory, PackageInventory, PackageSet, StageKind};
use stagegate_validation::ValidationPipeline;

use super::*;

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

const NAMESPACE: &str = "drupal/";

fn test_root(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "stagegate-stage-tests-{label}-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ))
}

fn set(entries: &[(&str, &str)]) -> PackageSet {
    PackageSet::new(
        entries
            .iter()
            .map(|(name, version)| InstalledPackage::new(*name, *version))
            .collect(),
    )
    .expect("must build package set")
}

fn read_active(project: &Path) -> PackageSet {
    JsonInventory::with_namespace(NAMESPACE)
        .list_packages(project)
        .expect("must read active inventory")
}

/// Engine double that treats a require constraint as the exact version to
/// stage and can be told to fail any operation.
#[derive(Default)]
struct FakeEngine {
    staging_root: PathBuf,
    fail_on: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<String>>,
}

impl FakeEngine {
    fn new(staging_root: PathBuf) -> Self {
        Self {
            staging_root,
            ..Self::default()
        }
    }

    fn fail(&self, operation: &'static str) {
        self.fail_on
            .lock()
            .expect("must lock failure set")
            .insert(operation);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("must lock calls").clone()
    }

    fn enter(&self, operation: &'static str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("must lock calls")
            .push(operation.to_string());
        if self
            .fail_on
            .lock()
            .expect("must lock failure set")
            .contains(operation)
        {
            bail!("injected {operation} failure");
        }
        Ok(())
    }
}

impl StagingEngine for FakeEngine {
    fn allocate(&self, stage_id: &str, active_dir: &Path) -> anyhow::Result<PathBuf> {
        self.enter("allocate")?;
        let stage_dir = self.staging_root.join(stage_id);
        fs::create_dir_all(&stage_dir).context("create stage dir")?;
        fs::copy(
            JsonInventory::inventory_path(active_dir),
            JsonInventory::inventory_path(&stage_dir),
        )
        .context("seed stage inventory")?;
        Ok(stage_dir)
    }

    fn stage(
        &self,
        operations: &[StageOperation],
        _active_dir: &Path,
        stage_dir: &Path,
        _timeout: Duration,
    ) -> anyhow::Result<()> {
        self.enter("stage")?;
        let mut packages = JsonInventory::new().list_packages(stage_dir)?.into_packages();
        for operation in operations {
            match operation {
                StageOperation::Require {
                    package,
                    constraint,
                } => {
                    let version = constraint.clone().unwrap_or_else(|| "1.0.0".to_string());
                    packages.retain(|existing| existing.name != *package);
                    packages.push(InstalledPackage::new(package.clone(), version));
                }
                StageOperation::Remove { package } => {
                    packages.retain(|existing| existing.name != *package);
                }
            }
        }
        JsonInventory::write_package_set(stage_dir, &PackageSet::new(packages)?)?;
        Ok(())
    }

    fn commit(&self, stage_dir: &Path, active_dir: &Path) -> anyhow::Result<()> {
        self.enter("commit")?;
        fs::copy(
            JsonInventory::inventory_path(stage_dir),
            JsonInventory::inventory_path(active_dir),
        )
        .context("copy staged inventory")?;
        Ok(())
    }

    fn post_apply(&self, _stage_dir: &Path, _active_dir: &Path) -> anyhow::Result<()> {
        self.enter("post_apply")
    }

    fn release(&self, stage_dir: &Path) -> anyhow::Result<()> {
        self.enter("release")?;
        if stage_dir.exists() {
            fs::remove_dir_all(stage_dir).context("remove stage dir")?;
        }
        Ok(())
    }
}

struct Fixture {
    root: PathBuf,
    project: PathBuf,
    layout: StateLayout,
    engine: Arc<FakeEngine>,
    lifecycle: StageLifecycle,
}

impl Fixture {
    fn new(active: &[(&str, &str)]) -> Self {
        let root = test_root("lifecycle");
        let project = root.join("project");
        fs::create_dir_all(&project).expect("must create project dir");
        JsonInventory::write_package_set(&project, &set(active)).expect("must write active");

        let layout = StateLayout::new(root.join("state"));
        layout.ensure_base_dirs().expect("must create state dirs");
        let engine = Arc::new(FakeEngine::new(layout.staging_dir()));
        let pipeline = ValidationPipeline::standard(
            Arc::new(JsonInventory::with_namespace(NAMESPACE)),
            &project,
            NAMESPACE,
        );
        let lifecycle = StageLifecycle::new(
            engine.clone(),
            StageLedger::new(layout.clone()),
            pipeline,
        );

        Self {
            root,
            project,
            layout,
            engine,
            lifecycle,
        }
    }

    fn create_and_claim(&self, slot: &str, kind: StageKind) -> Stage {
        let handle = self.lifecycle.create(slot, kind).expect("must create stage");
        self.lifecycle.claim(&handle).expect("must claim stage")
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn packages(specs: &[&str]) -> Vec<String> {
    specs.iter().map(|spec| spec.to_string()).collect()
}

#[test]
fn create_then_claim_returns_created_stage_with_seeded_directory() {
    let fixture = Fixture::new(&[("drupal/core", "10.2.0")]);
    let handle = fixture
        .lifecycle
        .create("session-1", StageKind::Installer)
        .expect("must create stage");
    assert!(is_valid_stage_id(&handle.id));

    let stage = fixture.lifecycle.claim(&handle).expect("must claim stage");
    assert_eq!(stage.state(), StageState::Created);
    assert_eq!(stage.slot(), "session-1");
    assert_eq!(stage.kind(), &StageKind::Installer);
    assert!(stage.operations().is_empty());
    let directory = stage.directory().expect("stage must have a directory");
    assert!(JsonInventory::inventory_path(directory).exists());
    assert!(!fixture
        .lifecycle
        .is_available("session-1")
        .expect("must check availability"));
}

#[test]
fn create_reports_busy_slot_in_every_live_state() {
    let fixture = Fixture::new(&[]);
    let mut stage = fixture.create_and_claim("busy", StageKind::Installer);

    let assert_busy = |expected: StageState| {
        let err = fixture
            .lifecycle
            .create("busy", StageKind::Installer)
            .expect_err("second create must fail");
        match err {
            StageError::StageBusy { slot, stage_id } => {
                assert_eq!(slot, "busy");
                assert_eq!(stage_id, stage_record_id(&fixture, "busy"));
            }
            other => panic!("expected busy slot in state {expected}, got {other}"),
        }
    };

    assert_busy(StageState::Created);
    fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/token:1.9.0"]))
        .expect("must require");
    assert_busy(StageState::Populated);

    let mut committing = stage.record().clone();
    committing.state = StageState::Committing;
    StageLedger::new(fixture.layout.clone())
        .write_record(&committing)
        .expect("must write committing record");
    assert_busy(StageState::Committing);
    StageLedger::new(fixture.layout.clone())
        .write_record(stage.record())
        .expect("must restore populated record");

    fixture.lifecycle.apply(&mut stage).expect("must apply");
    assert_busy(StageState::Committed);
    fixture.lifecycle.post_apply(&mut stage).expect("must finalize");
    assert_busy(StageState::Finalized);

    fixture.lifecycle.destroy(stage, false).expect("must destroy");
    assert!(fixture
        .lifecycle
        .is_available("busy")
        .expect("must check availability"));
    fixture
        .lifecycle
        .create("busy", StageKind::Installer)
        .expect("slot must be free after destroy");
}

fn stage_record_id(fixture: &Fixture, slot: &str) -> String {
    fixture
        .lifecycle
        .stage_for_slot(slot)
        .expect("must read slot")
        .expect("slot must hold a stage")
        .id
}

#[test]
fn slots_are_independent() {
    let fixture = Fixture::new(&[]);
    fixture.create_and_claim("alpha", StageKind::Installer);
    fixture.create_and_claim("beta", StageKind::Uninstaller);
    assert_ne!(
        stage_record_id(&fixture, "alpha"),
        stage_record_id(&fixture, "beta")
    );
}

#[test]
fn claim_never_created_handle_is_not_found() {
    let fixture = Fixture::new(&[]);
    for id in ["stage-0123456789abcdef", "../../etc/passwd", ""] {
        let err = fixture
            .lifecycle
            .claim(&StageHandle::new(id))
            .expect_err("claim must fail");
        assert!(
            matches!(err, StageError::StageNotFound { .. }),
            "unexpected error for {id:?}: {err}"
        );
    }
}

#[test]
fn claim_destroyed_handle_is_not_found() {
    let fixture = Fixture::new(&[]);
    let handle = fixture
        .lifecycle
        .create("slot", StageKind::Installer)
        .expect("must create stage");
    let stage = fixture.lifecycle.claim(&handle).expect("must claim stage");
    fixture
        .lifecycle
        .destroy(stage, true)
        .expect("must force destroy");

    let err = fixture
        .lifecycle
        .claim(&handle)
        .expect_err("claim must fail after destroy");
    assert!(matches!(err, StageError::StageNotFound { .. }));

    let record = StageLedger::new(fixture.layout.clone())
        .read_record(&handle.id)
        .expect("must read record")
        .expect("destroyed record must be kept");
    assert_eq!(record.state, StageState::Destroyed);
}

#[test]
fn claim_fails_when_stage_directory_disappeared_and_slot_can_be_force_released() {
    let fixture = Fixture::new(&[]);
    let stage = fixture.create_and_claim("slot", StageKind::Installer);
    let handle = stage.handle();
    fs::remove_dir_all(stage.directory().expect("must have dir")).expect("must remove dir");

    let err = fixture
        .lifecycle
        .claim(&handle)
        .expect_err("claim must fail without directory");
    assert!(matches!(err, StageError::StageNotFound { .. }));
    assert!(!fixture
        .lifecycle
        .is_available("slot")
        .expect("must check availability"));

    let released = fixture
        .lifecycle
        .force_release_slot("slot")
        .expect("must force release");
    assert_eq!(released.as_deref(), Some(handle.id.as_str()));
    assert!(fixture
        .lifecycle
        .is_available("slot")
        .expect("must check availability"));
    assert_eq!(
        fixture
            .lifecycle
            .force_release_slot("slot")
            .expect("second release must succeed"),
        None
    );
}

#[test]
fn commit_failure_records_failure_and_requires_force_to_destroy() {
    let fixture = Fixture::new(&[("drupal/core", "10.2.0")]);
    let mut stage = fixture.create_and_claim("slot", StageKind::Installer);
    fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/token:1.9.0"]))
        .expect("must require");

    fixture.engine.fail("commit");
    let err = fixture
        .lifecycle
        .apply(&mut stage)
        .expect_err("apply must fail");
    assert!(matches!(
        err,
        StageError::Engine {
            operation: "commit",
            ..
        }
    ));
    assert_eq!(stage.state(), StageState::Committed);
    assert!(stage
        .failure()
        .expect("failure must be recorded")
        .contains("injected commit failure"));

    let reclaimed = fixture
        .lifecycle
        .claim(&stage.handle())
        .expect("must reclaim failed stage");
    assert_eq!(reclaimed.failure(), stage.failure());

    let err = fixture
        .lifecycle
        .post_apply(&mut stage)
        .expect_err("post-apply must refuse a failed commit");
    assert!(matches!(err, StageError::InvalidTransition { .. }));

    let err = fixture
        .lifecycle
        .destroy(stage.clone(), false)
        .expect_err("destroy without force must fail");
    assert!(matches!(
        err,
        StageError::ForceRequired {
            state: StageState::Committed,
            ..
        }
    ));

    fixture
        .lifecycle
        .destroy(stage, true)
        .expect("forced destroy must succeed");
    assert!(fixture
        .lifecycle
        .is_available("slot")
        .expect("must check availability"));
    assert!(!read_active(&fixture.project).contains("drupal/token"));
}

#[test]
fn uninstaller_rejects_require_without_touching_operations() {
    let fixture = Fixture::new(&[("drupal/token", "1.9.0")]);
    let mut stage = fixture.create_and_claim("slot", StageKind::Uninstaller);
    fixture
        .lifecycle
        .uninstall(&mut stage, &packages(&["drupal/token"]))
        .expect("must stage removal");
    let before = stage.operations().to_vec();

    let err = fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/pathauto"]))
        .expect_err("require must be rejected");
    assert!(matches!(
        err,
        StageError::UnsupportedOperation {
            kind: StageKind::Uninstaller,
            operation: "require",
        }
    ));
    assert_eq!(stage.operations(), before.as_slice());

    let reclaimed = fixture
        .lifecycle
        .claim(&stage.handle())
        .expect("must reclaim");
    assert_eq!(reclaimed.operations(), before.as_slice());
    assert_eq!(fixture.engine.calls(), vec!["allocate", "stage"]);
}

#[test]
fn installer_rejects_uninstall() {
    let fixture = Fixture::new(&[("drupal/token", "1.9.0")]);
    let mut stage = fixture.create_and_claim("slot", StageKind::Installer);
    let err = fixture
        .lifecycle
        .uninstall(&mut stage, &packages(&["drupal/token"]))
        .expect_err("uninstall must be rejected");
    assert!(matches!(
        err,
        StageError::UnsupportedOperation {
            operation: "uninstall",
            ..
        }
    ));
    assert_eq!(stage.state(), StageState::Created);
}

#[test]
fn other_kinds_accept_both_operations() {
    let fixture = Fixture::new(&[("drupal/token", "1.9.0")]);
    let mut stage = fixture.create_and_claim("slot", StageKind::Other("updater".to_string()));
    fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/pathauto:1.12.0"]))
        .expect("must require");
    fixture
        .lifecycle
        .uninstall(&mut stage, &packages(&["drupal/token"]))
        .expect("must uninstall");
    assert_eq!(
        stage.operations(),
        &[
            StageOperation::require("drupal/pathauto:1.12.0"),
            StageOperation::remove("drupal/token"),
        ]
    );
}

#[test]
fn unstable_release_blocks_apply_and_leaves_stage_populated() {
    let fixture = Fixture::new(&[]);
    let mut stage = fixture.create_and_claim("slot", StageKind::Installer);
    fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/foo:2.0.0-beta1"]))
        .expect("must require");

    let err = fixture
        .lifecycle
        .apply(&mut stage)
        .expect_err("apply must be blocked");
    let report = err.validation_report().expect("must carry a report");
    let errors = report.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].messages,
        vec!["Unable to install foo, version 2.0.0-beta1, because only installing stable modules is supported."]
    );

    assert_eq!(stage.state(), StageState::Populated);
    let reclaimed = fixture
        .lifecycle
        .claim(&stage.handle())
        .expect("must reclaim");
    assert_eq!(reclaimed.state(), StageState::Populated);
    assert!(read_active(&fixture.project).is_empty());
    assert!(!fixture.engine.calls().contains(&"commit".to_string()));
}

#[test]
fn stable_release_applies_and_finalizes() {
    let fixture = Fixture::new(&[("drupal/core", "10.2.0")]);
    let mut stage = fixture.create_and_claim("slot", StageKind::Installer);
    fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/foo:2.0.0"]))
        .expect("must require");

    let report = fixture.lifecycle.apply(&mut stage).expect("must apply");
    assert!(!report.has_errors());
    assert_eq!(stage.state(), StageState::Committed);
    assert_eq!(
        read_active(&fixture.project)
            .get("drupal/foo")
            .map(|package| package.version.as_str()),
        Some("2.0.0")
    );

    fixture.lifecycle.post_apply(&mut stage).expect("must finalize");
    assert_eq!(stage.state(), StageState::Finalized);
    let stage_dir = stage.directory().expect("must have dir").to_path_buf();
    fixture.lifecycle.destroy(stage, false).expect("must destroy");
    assert!(!stage_dir.exists());
}

#[test]
fn destroy_without_force_requires_clean_commit() {
    let fixture = Fixture::new(&[]);
    let stage = fixture.create_and_claim("slot", StageKind::Installer);
    let err = fixture
        .lifecycle
        .destroy(stage.clone(), false)
        .expect_err("must require force");
    assert!(matches!(
        err,
        StageError::ForceRequired {
            state: StageState::Created,
            ..
        }
    ));
    assert!(stage.directory().expect("must have dir").exists());
}

#[test]
fn out_of_order_operations_are_invalid_transitions() {
    let fixture = Fixture::new(&[]);
    let mut stage = fixture.create_and_claim("slot", StageKind::Installer);

    let err = fixture
        .lifecycle
        .apply(&mut stage)
        .expect_err("apply needs a populated stage");
    assert!(matches!(
        err,
        StageError::InvalidTransition {
            state: StageState::Created,
            operation: "apply",
        }
    ));

    let err = fixture
        .lifecycle
        .post_apply(&mut stage)
        .expect_err("post-apply needs a committed stage");
    assert!(matches!(err, StageError::InvalidTransition { .. }));

    fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/foo:1.0.0"]))
        .expect("must require");
    fixture.lifecycle.apply(&mut stage).expect("must apply");
    let err = fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/bar:1.0.0"]))
        .expect_err("require after commit must fail");
    assert!(matches!(
        err,
        StageError::InvalidTransition {
            state: StageState::Committed,
            operation: "require",
        }
    ));
}

#[test]
fn empty_require_is_a_no_op() {
    let fixture = Fixture::new(&[]);
    let mut stage = fixture.create_and_claim("slot", StageKind::Installer);
    fixture
        .lifecycle
        .require(&mut stage, &[])
        .expect("empty require must succeed");
    assert_eq!(stage.state(), StageState::Created);
    assert_eq!(fixture.engine.calls(), vec!["allocate"]);
}

#[test]
fn engine_staging_failure_leaves_stage_unchanged() {
    let fixture = Fixture::new(&[]);
    let mut stage = fixture.create_and_claim("slot", StageKind::Installer);
    fixture.engine.fail("stage");
    let err = fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/foo:1.0.0"]))
        .expect_err("require must fail");
    assert!(matches!(
        err,
        StageError::Engine {
            operation: "stage",
            ..
        }
    ));
    assert_eq!(stage.state(), StageState::Created);
    assert!(stage.operations().is_empty());
}

#[test]
fn allocate_failure_frees_the_slot() {
    let fixture = Fixture::new(&[]);
    fixture.engine.fail("allocate");
    let err = fixture
        .lifecycle
        .create("slot", StageKind::Installer)
        .expect_err("create must fail");
    assert!(matches!(
        err,
        StageError::Engine {
            operation: "allocate",
            ..
        }
    ));
    assert!(fixture
        .lifecycle
        .is_available("slot")
        .expect("must check availability"));
}

#[test]
fn invalid_slot_names_are_rejected() {
    let fixture = Fixture::new(&[]);
    for slot in ["", ".hidden", "a/b", "spaced slot"] {
        let err = fixture
            .lifecycle
            .create(slot, StageKind::Installer)
            .expect_err("create must fail");
        assert!(matches!(err, StageError::InvalidSlot(_)), "slot {slot:?}");
    }
}

#[test]
fn stale_slot_marker_does_not_block_create() {
    let fixture = Fixture::new(&[]);
    fs::write(
        fixture.layout.slot_marker_path("slot"),
        "stage-00000000deadbeef\n",
    )
    .expect("must write stale marker");

    fixture
        .lifecycle
        .create("slot", StageKind::Installer)
        .expect("stale marker must be replaced");
}

#[test]
fn status_check_reports_changes_without_blocking() {
    let fixture = Fixture::new(&[("drupal/a", "1.0.0")]);
    let mut stage = fixture.create_and_claim("slot", StageKind::Installer);
    fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/a:1.1.0", "drupal/b:1.0.0"]))
        .expect("must require");

    let report = fixture
        .lifecycle
        .status_check(&stage)
        .expect("must run status check");
    assert!(!report.has_errors());
    let warnings = report.warnings();
    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[0].messages, vec!["drupal/a changed from 1.0.0 to 1.1.0"]);
    assert_eq!(warnings[1].messages, vec!["drupal/b added with version 1.0.0"]);
}

#[test]
fn journal_records_every_transition_in_order() {
    let fixture = Fixture::new(&[]);
    let mut stage = fixture.create_and_claim("slot", StageKind::Installer);
    fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/foo:1.0.0"]))
        .expect("must require");
    fixture.lifecycle.apply(&mut stage).expect("must apply");
    fixture.lifecycle.post_apply(&mut stage).expect("must finalize");
    let handle = stage.handle();
    fixture.lifecycle.destroy(stage, false).expect("must destroy");

    let journal = fixture.lifecycle.journal(&handle).expect("must read journal");
    let steps = journal
        .iter()
        .map(|entry| (entry.seq, entry.operation.as_str(), entry.from, entry.to))
        .collect::<Vec<_>>();
    assert_eq!(
        steps,
        vec![
            (1, "create", StageState::Absent, StageState::Created),
            (2, "require", StageState::Created, StageState::Populated),
            (3, "apply", StageState::Populated, StageState::Committing),
            (4, "commit", StageState::Committing, StageState::Committed),
            (5, "post-apply", StageState::Committed, StageState::Finalized),
            (6, "destroy", StageState::Finalized, StageState::Destroyed),
        ]
    );
    assert_eq!(journal[1].detail.as_deref(), Some("require drupal/foo:1.0.0"));
}

#[test]
fn stage_record_round_trips_through_ledger() {
    let root = test_root("ledger");
    let ledger = StageLedger::new(StateLayout::new(&root));
    let record = StageRecord {
        version: STAGE_RECORD_VERSION,
        id: "stage-00aa11bb22cc33dd".to_string(),
        slot: "job-7".to_string(),
        kind: StageKind::Other("updater".to_string()),
        state: StageState::Populated,
        directory: Some(root.join("staging").join("stage-00aa11bb22cc33dd")),
        failure: None,
        created_at_unix: 10,
        updated_at_unix: 11,
        journal_seq: 2,
        operations: vec![
            StageOperation::require("drupal/token:^1.9"),
            StageOperation::remove("drupal/pathauto"),
        ],
    };

    ledger.write_record(&record).expect("must write record");
    let loaded = ledger
        .read_record(&record.id)
        .expect("must read record")
        .expect("record must exist");
    assert_eq!(loaded, record);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn ledger_rejects_unknown_record_version() {
    let root = test_root("ledger-version");
    let layout = StateLayout::new(&root);
    layout.ensure_base_dirs().expect("must create dirs");
    fs::write(
        layout.stage_record_path("stage-abc"),
        "version = 9\nid = \"stage-abc\"\nslot = \"s\"\nkind = \"installer\"\nstate = \"created\"\ncreated_at_unix = 1\nupdated_at_unix = 1\n",
    )
    .expect("must write record");

    let err = StageLedger::new(layout)
        .read_record("stage-abc")
        .expect_err("unknown version must fail");
    assert!(err.to_string().contains("unsupported stage record version 9"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn slot_claim_is_exclusive_until_cleared() {
    let root = test_root("slot-claim");
    let ledger = StageLedger::new(StateLayout::new(&root));

    assert!(matches!(
        ledger.claim_slot("s", "stage-1").expect("must claim"),
        SlotClaim::Claimed(_)
    ));
    assert_eq!(
        ledger.claim_slot("s", "stage-2").expect("must report holder"),
        SlotClaim::Held {
            stage_id: "stage-1".to_string()
        }
    );
    ledger.clear_slot_marker("s").expect("must clear");
    ledger.clear_slot_marker("s").expect("clearing twice is fine");
    assert_eq!(ledger.read_slot_marker("s").expect("must read"), None);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn slot_names_and_stage_ids_are_validated() {
    assert!(validate_slot_name("session-1"));
    assert!(validate_slot_name("job_42.retry"));
    assert!(!validate_slot_name(""));
    assert!(!validate_slot_name(".slot"));
    assert!(!validate_slot_name("a/b"));
    assert!(!validate_slot_name(&"x".repeat(129)));

    let first = generate_stage_id("slot");
    let second = generate_stage_id("slot");
    assert_ne!(first, second);
    assert!(is_valid_stage_id(&first));
    assert_eq!(first.len(), "stage-".len() + 16);
    assert!(!is_valid_stage_id("stage-"));
    assert!(!is_valid_stage_id("stage-../x"));
}

#[test]
fn require_spec_parsing_splits_constraint() {
    assert_eq!(
        StageOperation::require("drupal/token:^1.9"),
        StageOperation::Require {
            package: "drupal/token".to_string(),
            constraint: Some("^1.9".to_string()),
        }
    );
    assert_eq!(
        StageOperation::require(" drupal/token "),
        StageOperation::Require {
            package: "drupal/token".to_string(),
            constraint: None,
        }
    );
    assert_eq!(
        StageOperation::require("drupal/token:").to_string(),
        "require drupal/token"
    );
}

#[test]
fn state_paths_follow_layout() {
    let layout = StateLayout::new("/state");
    assert_eq!(layout.stage_dir("stage-1"), PathBuf::from("/state/staging/stage-1"));
    assert_eq!(
        layout.stage_record_path("stage-1"),
        PathBuf::from("/state/ledger/stage-1.toml")
    );
    assert_eq!(
        layout.stage_journal_path("stage-1"),
        PathBuf::from("/state/ledger/stage-1.journal")
    );
    assert_eq!(
        layout.slot_marker_path("s"),
        PathBuf::from("/state/slots/s.active")
    );
    assert_eq!(layout.handles_path(), PathBuf::from("/state/handles.toml"));
}

fn release(version: &str) -> CatalogRelease {
    CatalogRelease {
        package: "drupal/token".to_string(),
        version: version.to_string(),
        project: Some("token".to_string()),
    }
}

#[test]
fn select_release_handles_exact_range_and_latest() {
    let releases = vec![
        release("8.x-1.9"),
        release("1.10.0"),
        release("2.0.0-beta1"),
        release("8.x-2.x-dev"),
    ];

    let exact = select_release(&releases, Some("8.x-1.9"))
        .expect("must select")
        .expect("must find exact");
    assert_eq!(exact.version, "8.x-1.9");
    let exact = select_release(&releases, Some("1.9.0"))
        .expect("must select")
        .expect("must match normalized");
    assert_eq!(exact.version, "8.x-1.9");

    let ranged = select_release(&releases, Some("^1"))
        .expect("must select")
        .expect("must match range");
    assert_eq!(ranged.version, "1.10.0");

    let latest = select_release(&releases, None)
        .expect("must select")
        .expect("must pick latest");
    assert_eq!(latest.version, "2.0.0-beta1");
    assert_eq!(latest_release(&releases), Some(latest));

    assert_eq!(select_release(&releases, Some("3.0.0")).expect("must select"), None);
    assert!(select_release(&releases, Some("not a range")).is_err());
}

struct DirectoryFixture {
    root: PathBuf,
    project: PathBuf,
    lifecycle: StageLifecycle,
}

impl DirectoryFixture {
    fn new() -> Self {
        let root = test_root("directory-engine");
        let project = root.join("project");
        let catalog_root = root.join("catalog");
        fs::create_dir_all(&project).expect("must create project");
        fs::create_dir_all(catalog_root.join("drupal")).expect("must create catalog");
        fs::write(
            catalog_root.join("drupal").join("token.toml"),
            "project = \"token\"\n\n[[releases]]\nversion = \"8.x-1.9\"\n\n[[releases]]\nversion = \"1.10.0\"\n\n[[releases]]\nversion = \"2.0.0-beta1\"\n",
        )
        .expect("must write catalog entry");
        JsonInventory::write_package_set(
            &project,
            &set(&[("drupal/core", "10.2.0"), ("drupal/pathauto", "8.x-1.11")]),
        )
        .expect("must write active");

        let layout = StateLayout::new(root.join("state"));
        layout.ensure_base_dirs().expect("must create state dirs");
        let inventory = JsonInventory::with_namespace(NAMESPACE);
        let engine = DirectoryEngine::new(
            layout.clone(),
            inventory.clone(),
            Arc::new(ReleaseCatalog::open(&catalog_root)),
        );
        let lifecycle = StageLifecycle::new(
            Arc::new(engine),
            StageLedger::new(layout),
            ValidationPipeline::standard(Arc::new(inventory), &project, NAMESPACE),
        )
        .with_stage_timeout(Duration::from_secs(30));

        Self {
            root,
            project,
            lifecycle,
        }
    }
}

impl Drop for DirectoryFixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

#[test]
fn directory_engine_installs_catalog_release_end_to_end() {
    let fixture = DirectoryFixture::new();
    let handle = fixture
        .lifecycle
        .create("site", StageKind::Installer)
        .expect("must create");
    let mut stage = fixture.lifecycle.claim(&handle).expect("must claim");
    fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/token:^1"]))
        .expect("must stage token");

    let stage_dir = stage.directory().expect("must have dir").to_path_buf();
    fixture.lifecycle.apply(&mut stage).expect("must apply");
    assert!(stage_dir.join(PRE_APPLY_BACKUP_FILE_NAME).exists());

    let active = read_active(&fixture.project);
    let token = active.get("drupal/token").expect("token must be installed");
    assert_eq!(token.version, "1.10.0");
    assert_eq!(token.project_name(), "token");
    assert_eq!(active.names(), vec!["drupal/core", "drupal/pathauto", "drupal/token"]);

    fixture.lifecycle.post_apply(&mut stage).expect("must finalize");
    let cache = fs::read_to_string(DirectoryEngine::package_cache_path(&fixture.project))
        .expect("must read package cache");
    assert!(cache.contains("drupal/token 1.10.0\n"));

    fixture.lifecycle.destroy(stage, false).expect("must destroy");
    assert!(!stage_dir.exists());
}

#[test]
fn directory_engine_blocks_latest_pre_release() {
    let fixture = DirectoryFixture::new();
    let handle = fixture
        .lifecycle
        .create("site", StageKind::Installer)
        .expect("must create");
    let mut stage = fixture.lifecycle.claim(&handle).expect("must claim");
    fixture
        .lifecycle
        .require(&mut stage, &packages(&["drupal/token"]))
        .expect("must stage token");

    let err = fixture
        .lifecycle
        .apply(&mut stage)
        .expect_err("beta must be blocked");
    assert!(err.to_string().contains("Unable to install token, version 2.0.0-beta1"));
    assert!(read_active(&fixture.project).get("drupal/token").is_none());
}

#[test]
fn directory_engine_rejects_unknown_package_and_missing_removal() {
    let fixture = DirectoryFixture::new();
    let mut installer = fixture
        .lifecycle
        .claim(
            &fixture
                .lifecycle
                .create("install", StageKind::Installer)
                .expect("must create"),
        )
        .expect("must claim");
    let err = fixture
        .lifecycle
        .require(&mut installer, &packages(&["drupal/unknown"]))
        .expect_err("unknown package must fail");
    assert!(format!("{:#}", anyhow::Error::new(err)).contains("not found in the release catalog"));

    let mut uninstaller = fixture
        .lifecycle
        .claim(
            &fixture
                .lifecycle
                .create("remove", StageKind::Uninstaller)
                .expect("must create"),
        )
        .expect("must claim");
    let err = fixture
        .lifecycle
        .uninstall(&mut uninstaller, &packages(&["drupal/token"]))
        .expect_err("missing package must fail");
    assert!(matches!(err, StageError::Engine { .. }));

    fixture
        .lifecycle
        .uninstall(&mut uninstaller, &packages(&["drupal/pathauto"]))
        .expect("must stage removal");
    fixture.lifecycle.apply(&mut uninstaller).expect("must apply");
    assert_eq!(read_active(&fixture.project).names(), vec!["drupal/core"]);
}

#[test]
fn step_lock_is_exclusive_and_released_on_drop() {
    let root = test_root("step-lock");
    let ledger = StageLedger::new(StateLayout::new(&root));

    let lock = ledger
        .acquire_step_lock("site")
        .expect("must take lock")
        .expect("lock must be free");
    assert_eq!(lock.path(), ledger.layout().step_lock_path("site"));
    assert!(ledger
        .acquire_step_lock("site")
        .expect("must check lock")
        .is_none());
    assert!(ledger
        .acquire_step_lock("other")
        .expect("must take lock")
        .is_some());

    drop(lock);
    assert!(!ledger.layout().step_lock_path("site").exists());

    fs::write(ledger.layout().step_lock_path("site"), "4242\n").expect("must leave stale lock");
    assert!(ledger
        .acquire_step_lock("site")
        .expect("must check lock")
        .is_none());
    ledger.clear_step_lock("site").expect("must clear stale lock");
    ledger.clear_step_lock("site").expect("clearing twice must be fine");
    assert!(ledger
        .acquire_step_lock("site")
        .expect("must take lock")
        .is_some());

    let _ = fs::remove_dir_all(&root);
}
