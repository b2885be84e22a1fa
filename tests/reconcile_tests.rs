mod common;

use common::harness;
use kv_runner::error::Result;
use kv_runner::instance::{InstanceConf, InstanceStatus};
use kv_runner::reconcile::ReconcileScheduler;
use kv_runner::store::{InstanceRepository, SqliteRepository};
use kv_runner::{KvRunner, ReconcileReport};
use std::sync::Arc;
use std::time::Duration;

fn write_orphan(base: &std::path::Path, id: &str, port: u16) {
    let dir = base.join(id);
    std::fs::create_dir_all(dir.join("data")).unwrap();
    InstanceConf::new(port, dir.join("data"), None)
        .write(&dir.join("server.conf"))
        .unwrap();
}

#[tokio::test]
async fn test_orphan_directory_is_adopted_once() -> Result<()> {
    let h = harness(25300, 25309);
    write_orphan(h.runner.layout().base_dir(), "legacy", 6000);

    let report = h.runner.reconcile().await?;

    assert_eq!(report.adopted, vec!["legacy"]);
    let all = h.runner.list().await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "legacy");
    assert_eq!(all[0].port, 6000);
    assert_eq!(all[0].status, InstanceStatus::Stopped);

    let again = h.runner.reconcile().await?;
    assert_eq!(again, ReconcileReport::default());
    assert_eq!(h.runner.list().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_adopted_port_is_not_allocated_again() -> Result<()> {
    let h = harness(25310, 25319);
    write_orphan(h.runner.layout().base_dir(), "legacy", 25310);
    h.runner.reconcile().await?;

    let created = h.runner.create("fresh").await?;

    assert_eq!(created.port, 25311);
    Ok(())
}

#[tokio::test]
async fn test_deleted_directory_removes_record() -> Result<()> {
    let h = harness(25320, 25329);
    h.runner.create("a").await?;
    h.runner.create("b").await?;
    std::fs::remove_dir_all(h.runner.layout().instance_dir("a")).unwrap();

    let report = h.runner.reconcile().await?;

    assert_eq!(report.removed, vec!["a"]);
    let ids: Vec<String> = h.runner.list().await?.into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec!["b"]);
    Ok(())
}

#[tokio::test]
async fn test_edited_config_realigns_record() -> Result<()> {
    let h = harness(25330, 25339);
    let created = h.runner.create("a").await?;
    let mut conf = InstanceConf::read(&created.config_path)?;
    conf.port = 25399;
    conf.requirepass = Some("rotated".to_string());
    conf.write(&created.config_path).unwrap();

    let report = h.runner.reconcile().await?;

    assert_eq!(report.realigned, vec!["a"]);
    let record = h.repo.find_by_id("a").await?.unwrap();
    assert_eq!(record.port, 25399);
    assert_eq!(record.credential(), Some("rotated"));
    assert!(!h.runner.reconcile().await?.has_changes());
    Ok(())
}

#[tokio::test]
async fn test_reconcile_against_sqlite_store() -> Result<()> {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = common::test_config(tmp.path(), 25340, 25349);
    let base = config.base_dir.clone();
    let db = config.database_path.clone();
    write_orphan(&base, "legacy", 6000);

    {
        let repo = Arc::new(SqliteRepository::open(&db)?);
        let runner = KvRunner::with_locator(
            config.clone(),
            repo,
            Arc::new(common::FakeLocator::default()),
        )?;
        assert_eq!(runner.reconcile().await?.adopted, vec!["legacy"]);
    }

    let reopened = SqliteRepository::open(&db)?;
    let record = reopened.find_by_id("legacy").await?.unwrap();
    assert_eq!(record.port, 6000);
    Ok(())
}

#[tokio::test]
async fn test_scheduler_runs_periodically() -> Result<()> {
    let h = harness(25350, 25359);
    let mut scheduler = ReconcileScheduler::new(h.runner.clone(), Duration::from_millis(100));
    scheduler.start()?;
    assert!(scheduler.is_running());

    write_orphan(h.runner.layout().base_dir(), "late", 6001);
    let mut adopted = false;
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if h.repo.find_by_id("late").await?.is_some() {
            adopted = true;
            break;
        }
    }

    scheduler.stop()?;
    assert!(adopted, "scheduler never picked up the new directory");
    assert!(!scheduler.is_running());
    Ok(())
}
