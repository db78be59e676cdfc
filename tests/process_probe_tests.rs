//! Process lookup against the live /proc

use libhotspotd::{SystemProbe, SystemRunner};
use serial_test::serial;
use std::process::{Child, Command};
use std::sync::Arc;
use tempfile::TempDir;

fn probe() -> SystemProbe {
    SystemProbe::new(Arc::new(SystemRunner::new()))
}

/// Run `sleep` under a distinctive process name
fn spawn_renamed_sleep(dir: &TempDir, name: &str) -> Option<Child> {
    let exe = dir.path().join(name);
    std::fs::copy("/bin/sleep", &exe).ok()?;
    match Command::new(&exe).arg("30").spawn() {
        Ok(child) => Some(child),
        Err(e) => {
            eprintln!("Test skipped: cannot execute from {}: {}", dir.path().display(), e);
            None
        }
    }
}

#[tokio::test]
#[serial]
async fn test_finds_running_process_by_name() {
    let dir = TempDir::new().unwrap();
    let name = format!("hsdp{}", std::process::id() % 100_000);
    let Some(mut child) = spawn_renamed_sleep(&dir, &name) else {
        return;
    };

    let mut found = None;
    for _ in 0..50 {
        found = probe().is_process_running(&name).await;
        if found.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(found, Some(child.id()));
    assert_eq!(probe().process_name(child.id()).await.as_deref(), Some(name.as_str()));

    child.kill().unwrap();
    child.wait().unwrap();
    assert_eq!(probe().is_process_running(&name).await, None);
}

#[tokio::test]
#[serial]
async fn test_absent_process() {
    assert_eq!(probe().is_process_running("hsd-no-such-proc").await, None);
    assert!(probe().find_processes("hsd-no-such-proc").await.is_empty());
}
