//! Environment variables, processes and startup tasks.

use std::collections::BTreeMap;

use crate::domain::{OutputProcess, ScheduledTask, TaskState, TaskTrigger};

use super::{parse_key_values, HostFs, ProbeError};

/// Author prefix of tasks shipped with the operating system itself
const OS_VENDOR_AUTHOR_PREFIX: &str = "Microsof";

/// Variables of the collector's own environment
pub fn user_variables<I>(vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter().collect()
}

/// Machine-wide variables from `/etc/environment`
pub async fn system_variables(fs: &HostFs) -> Result<BTreeMap<String, String>, ProbeError> {
    let text = fs.read_to_string("etc/environment").await?;
    Ok(parse_key_values(&text, '=').into_iter().collect())
}

/// Every user-space process visible in `/proc`
pub async fn running_processes(fs: &HostFs) -> Result<Vec<OutputProcess>, ProbeError> {
    let mut processes = Vec::new();

    for entry in fs.list_dir("proc").await? {
        let Ok(id) = entry.parse::<u32>() else {
            continue;
        };

        // Processes can exit between listing and reading
        let Ok(status) = fs.read_to_string(&format!("proc/{}/status", id)).await else {
            continue;
        };
        let fields: BTreeMap<String, String> = parse_key_values(&status, ':').into_iter().collect();

        // Kernel threads have no resident set
        let Some(working_set) = fields.get("VmRSS").and_then(|v| parse_kib(v)) else {
            continue;
        };

        let process_name = match fs.read_line(&format!("proc/{}/comm", id)).await {
            Ok(name) => name,
            Err(_) => fields.get("Name").cloned().unwrap_or_default(),
        };
        let exe_path = fs
            .read_link(&format!("proc/{}/exe", id))
            .await
            .ok()
            .map(|p| p.display().to_string());

        processes.push(OutputProcess {
            process_name,
            exe_path,
            id,
            working_set,
        });
    }

    processes.sort_by_key(|p| p.id);
    Ok(processes)
}

/// `"1234 kB"` to bytes
fn parse_kib(value: &str) -> Option<u64> {
    value
        .split_whitespace()
        .next()
        .and_then(|n| n.parse::<u64>().ok())
        .and_then(|kib| kib.checked_mul(1024))
}

/// Third-party tasks that run at boot or logon
pub async fn startup_tasks(fs: &HostFs) -> Result<Vec<ScheduledTask>, ProbeError> {
    let mut tasks = Vec::new();

    if let Ok(text) = fs.read_to_string("etc/crontab").await {
        tasks.extend(parse_crontab(&text, "/etc/crontab", None));
    }
    if let Ok(names) = fs.list_dir("etc/cron.d").await {
        for name in names {
            let path = format!("etc/cron.d/{}", name);
            if let Ok(text) = fs.read_to_string(&path).await {
                tasks.extend(parse_crontab(&text, &format!("/{}", path), None));
            }
        }
    }
    if let Ok(users) = fs.list_dir("var/spool/cron/crontabs").await {
        for user in users {
            let path = format!("var/spool/cron/crontabs/{}", user);
            if let Ok(text) = fs.read_to_string(&path).await {
                tasks.extend(parse_crontab(&text, &format!("/{}", path), Some(&user)));
            }
        }
    }

    Ok(tasks.into_iter().filter(is_startup_task).collect())
}

/// Parse cron entries. System crontabs carry a user column; per-user
/// crontabs pass their owner as `owner`.
pub fn parse_crontab(text: &str, path: &str, owner: Option<&str>) -> Vec<ScheduledTask> {
    let mut tasks = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Variable assignments such as SHELL=/bin/sh
        if line
            .split_whitespace()
            .next()
            .is_some_and(|first| first.contains('=') && !first.starts_with('@'))
        {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(first) = parts.next() else {
            continue;
        };

        let trigger = if first.starts_with('@') {
            match first {
                "@reboot" => TaskTrigger::Boot,
                "@hourly" | "@daily" | "@midnight" | "@weekly" | "@monthly" | "@yearly"
                | "@annually" => TaskTrigger::Time,
                _ => TaskTrigger::Other,
            }
        } else {
            // Skip the remaining four schedule fields
            for _ in 0..4 {
                parts.next();
            }
            TaskTrigger::Time
        };

        let author = match owner {
            Some(owner) => Some(owner.to_string()),
            None => parts.next().map(str::to_string),
        };
        let command: Vec<&str> = parts.collect();
        if command.is_empty() {
            continue;
        }

        tasks.push(ScheduledTask {
            name: command.join(" "),
            path: path.to_string(),
            author,
            state: TaskState::Ready,
            triggers: vec![trigger],
        });
    }

    tasks
}

/// A startup task is not from the OS vendor, is Ready or Running, and has
/// at least one boot or logon trigger.
pub fn is_startup_task(task: &ScheduledTask) -> bool {
    let vendor = task
        .author
        .as_deref()
        .is_some_and(|author| author.starts_with(OS_VENDOR_AUTHOR_PREFIX));
    let active = matches!(task.state, TaskState::Ready | TaskState::Running);
    let at_startup = task
        .triggers
        .iter()
        .any(|t| matches!(t, TaskTrigger::Boot | TaskTrigger::Logon));

    !vendor && active && at_startup
}

/// Whether a username contains anything besides ASCII letters, digits,
/// `.`, `_` and `-`
pub fn username_special_characters(username: &str) -> bool {
    !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Character counts of the commercial OneDrive path and its folder name
pub fn onedrive_commercial_lengths(path: &str) -> (u64, u64) {
    let name = path
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("");
    (path.chars().count() as u64, name.chars().count() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::fixture::FixtureHost;

    fn task(author: Option<&str>, state: TaskState, triggers: Vec<TaskTrigger>) -> ScheduledTask {
        ScheduledTask {
            name: "t".to_string(),
            path: "/t".to_string(),
            author: author.map(str::to_string),
            state,
            triggers,
        }
    }

    #[test]
    fn test_startup_filter_requires_active_state() {
        assert!(is_startup_task(&task(None, TaskState::Ready, vec![TaskTrigger::Boot])));
        assert!(is_startup_task(&task(Some("root"), TaskState::Running, vec![TaskTrigger::Logon])));

        // Disabled and queued tasks are excluded
        assert!(!is_startup_task(&task(None, TaskState::Disabled, vec![TaskTrigger::Boot])));
        assert!(!is_startup_task(&task(None, TaskState::Queued, vec![TaskTrigger::Boot])));
    }

    #[test]
    fn test_startup_filter_excludes_vendor_and_timers() {
        assert!(!is_startup_task(&task(
            Some("Microsoft Corporation"),
            TaskState::Ready,
            vec![TaskTrigger::Boot]
        )));
        assert!(!is_startup_task(&task(None, TaskState::Ready, vec![TaskTrigger::Time])));
        assert!(is_startup_task(&task(
            None,
            TaskState::Ready,
            vec![TaskTrigger::Time, TaskTrigger::Boot]
        )));
    }

    #[test]
    fn test_parse_crontab() {
        let text = "SHELL=/bin/sh\n# m h dom mon dow user command\n17 * * * * root cd / && run-parts\n@reboot root /usr/local/bin/agent --start\n";
        let tasks = parse_crontab(text, "/etc/crontab", None);

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].triggers, vec![TaskTrigger::Time]);
        assert_eq!(tasks[1].name, "/usr/local/bin/agent --start");
        assert_eq!(tasks[1].author.as_deref(), Some("root"));
        assert_eq!(tasks[1].triggers, vec![TaskTrigger::Boot]);
    }

    #[tokio::test]
    async fn test_startup_tasks_from_user_crontab() {
        let host = FixtureHost::new();
        host.write("var/spool/cron/crontabs/bob", "@reboot /home/bob/sync.sh\n0 1 * * * backup\n");

        let tasks = startup_tasks(&host.fs).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].author.as_deref(), Some("bob"));
        assert_eq!(tasks[0].name, "/home/bob/sync.sh");
    }

    #[tokio::test]
    async fn test_running_processes_skips_kernel_threads() {
        let host = FixtureHost::new();
        host.write("proc/1/status", "Name:\tsystemd\nVmRSS:\t   12000 kB\n")
            .write("proc/1/comm", "systemd\n")
            .write("proc/2/status", "Name:\tkthreadd\n")
            .write("proc/self/status", "Name:\tself\nVmRSS:\t1 kB\n");

        let processes = running_processes(&host.fs).await.unwrap();
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].process_name, "systemd");
        assert_eq!(processes[0].working_set, 12000 * 1024);
        assert_eq!(processes[0].exe_path, None);
    }

    #[test]
    fn test_parse_kib_rejects_overflow() {
        assert_eq!(parse_kib("12 kB"), Some(12 * 1024));
        assert_eq!(parse_kib(&format!("{} kB", u64::MAX)), None);
        assert_eq!(parse_kib("garbage"), None);
    }

    #[tokio::test]
    async fn test_process_with_oversized_rss_is_skipped() {
        let host = FixtureHost::new();
        host.write(
            "proc/7/status",
            format!("Name:\tbroken\nVmRSS:\t{} kB\n", u64::MAX),
        )
        .write("proc/8/status", "Name:\tok\nVmRSS:\t4 kB\n");

        let processes = running_processes(&host.fs).await.unwrap();
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].process_name, "ok");
    }

    #[test]
    fn test_username_and_onedrive_metrics() {
        assert!(!username_special_characters("alice.smith"));
        assert!(username_special_characters("José"));
        assert!(username_special_characters("a b"));

        assert_eq!(
            onedrive_commercial_lengths("C:\\Users\\bob\\OneDrive - Contoso"),
            (31, 18)
        );
    }
}
