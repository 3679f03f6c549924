//! Startup checks for the radio and the host.

use std::fmt;
use std::process::Command;

use pisentry_net::{InterfaceInspector, NetworkContext};

struct CheckResult {
    passed: bool,
    label: String,
}

impl CheckResult {
    fn pass(label: impl Into<String>) -> Self {
        Self {
            passed: true,
            label: label.into(),
        }
    }

    fn fail(label: impl Into<String>) -> Self {
        Self {
            passed: false,
            label: label.into(),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "[{tag}] {}", self.label)
    }
}

/// Outcome of every check, plus the resolved network when it succeeded.
pub struct Preflight {
    results: Vec<CheckResult>,
    context: Option<NetworkContext>,
}

impl Preflight {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn print(&self) {
        for r in &self.results {
            println!("{r}");
        }
    }

    /// Log every check; failures at error level.
    pub fn log(&self) {
        for r in &self.results {
            if r.passed {
                tracing::debug!("{r}");
            } else {
                tracing::error!("{r}");
            }
        }
    }

    /// The network context, only when every check passed.
    pub fn into_context(self) -> Option<NetworkContext> {
        if self.passed() { self.context } else { None }
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() { 0 } else { 1 }
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid() has no arguments, no side effects, and cannot fail.
    unsafe extern "C" {
        safe fn geteuid() -> u32;
    }
    geteuid() == 0
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

fn check_root() -> CheckResult {
    if is_root() {
        CheckResult::pass("running as root")
    } else {
        CheckResult::fail("must run as root for packet capture and ARP probing")
    }
}

fn check_binary(name: &str) -> CheckResult {
    let found = Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if found {
        CheckResult::pass(format!("{name} found in PATH"))
    } else {
        CheckResult::fail(format!("{name} not found in PATH"))
    }
}

fn check_monitor_mode(inspector: &InterfaceInspector, interface: &str) -> CheckResult {
    if !inspector.exists(interface) {
        return CheckResult::fail(format!("interface {interface} does not exist"));
    }
    match inspector.is_monitor_mode(interface) {
        Ok(true) => CheckResult::pass(format!("interface {interface} is in monitor mode")),
        Ok(false) => CheckResult::fail(format!(
            "interface {interface} is not in monitor mode or is down"
        )),
        Err(e) => CheckResult::fail(format!("interface {interface}: {e}")),
    }
}

fn check_network(
    inspector: &InterfaceInspector,
    interface: &str,
) -> (CheckResult, Option<NetworkContext>) {
    match inspector.network_context(interface) {
        Ok(ctx) => (
            CheckResult::pass(format!(
                "{} ({}) shares its MAC with {} on {}",
                ctx.monitor_interface, ctx.own_mac, ctx.managed_interface, ctx.network
            )),
            Some(ctx),
        ),
        Err(e) => (
            CheckResult::fail(format!("cannot resolve local network for {interface}: {e}")),
            None,
        ),
    }
}

/// Run every check against `interface`. `require_root` is off only in tests.
pub fn run_preflight(
    inspector: &InterfaceInspector,
    interface: &str,
    require_root: bool,
) -> Preflight {
    let mut results = Vec::new();
    if require_root {
        results.push(check_root());
        results.push(check_binary("tcpdump"));
        results.push(check_binary("arp-scan"));
    }

    let monitor = check_monitor_mode(inspector, interface);
    let monitor_ok = monitor.passed;
    results.push(monitor);

    let mut context = None;
    if monitor_ok {
        let (result, ctx) = check_network(inspector, interface);
        results.push(result);
        context = ctx;
    }

    Preflight { results, context }
}
