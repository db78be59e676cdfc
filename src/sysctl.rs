//! Kernel parameters through the sysctl tool

use crate::error::{HotspotError, HotspotResult};
use crate::runner::{CommandRunner, CommandSpec};

/// IPv4 packet forwarding switch
pub const IP_FORWARD: &str = "net.ipv4.ip_forward";

fn validate_key(key: &str) -> HotspotResult<()> {
    let ok = !key.is_empty()
        && !key.starts_with('-')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'));
    if ok {
        Ok(())
    } else {
        Err(HotspotError::InvalidParameter(format!("Invalid sysctl key: {}", key)))
    }
}

/// Value part of sysctl's `key = value` output
pub fn parse_sysctl_output(output: &str) -> String {
    let line = output.lines().next().unwrap_or("");
    match line.split_once('=') {
        Some((_, value)) => value.trim().to_string(),
        None => line.trim().to_string(),
    }
}

pub async fn read_sysctl(runner: &dyn CommandRunner, key: &str) -> HotspotResult<String> {
    validate_key(key)?;
    let cmd = CommandSpec::new("sysctl", &[key]);
    let output = runner.run(&cmd).await?.into_result(&cmd)?;
    Ok(parse_sysctl_output(&output))
}

pub async fn write_sysctl(runner: &dyn CommandRunner, key: &str, value: &str) -> HotspotResult<()> {
    validate_key(key)?;
    if value.is_empty() || value.chars().any(|c| c.is_control()) {
        return Err(HotspotError::InvalidParameter(format!("Invalid sysctl value for {}", key)));
    }
    let assignment = format!("{}={}", key, value);
    let cmd = CommandSpec::new("sysctl", &["-w", assignment.as_str()]);
    runner.run(&cmd).await?.into_result(&cmd)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutcome, MockCommandRunner};

    #[test]
    fn test_parse_sysctl_output() {
        assert_eq!(parse_sysctl_output("net.ipv4.ip_forward = 1\n"), "1");
        assert_eq!(parse_sysctl_output("kernel.hostname = box = lab\n"), "box = lab");
        assert_eq!(parse_sysctl_output("0\n"), "0");
        assert_eq!(parse_sysctl_output(""), "");
    }

    #[tokio::test]
    async fn test_read_sysctl() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.program == "sysctl" && cmd.args == vec![IP_FORWARD.to_string()])
            .times(1)
            .returning(|_| Ok(CommandOutcome::Success { output: "net.ipv4.ip_forward = 0\n".into() }));

        assert_eq!(read_sysctl(&runner, IP_FORWARD).await.unwrap(), "0");
    }

    #[tokio::test]
    async fn test_write_sysctl() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.to_string() == "sysctl -w net.ipv4.ip_forward=1")
            .times(1)
            .returning(|_| Ok(CommandOutcome::Success { output: "net.ipv4.ip_forward = 1\n".into() }));

        write_sysctl(&runner, IP_FORWARD, "1").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_sysctl_reports_failure() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| {
            Ok(CommandOutcome::NonZeroExit {
                code: Some(255),
                output: "sysctl: permission denied on key \"net.ipv4.ip_forward\"".into(),
            })
        });

        let err = write_sysctl(&runner, IP_FORWARD, "1").await.unwrap_err();
        assert!(matches!(err, HotspotError::CommandFailed { code: Some(255), .. }));
    }

    #[tokio::test]
    async fn test_rejects_option_like_key() {
        let runner = MockCommandRunner::new();
        assert!(read_sysctl(&runner, "-a").await.is_err());
        assert!(write_sysctl(&runner, IP_FORWARD, "1\n-p").await.is_err());
    }
}
