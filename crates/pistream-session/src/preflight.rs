//! Environment checks run before a session touches the network.

use pistream_core::SessionError;
use tracing::{debug, warn};

type Probe = Box<dyn Fn() -> Result<(), String> + Send + Sync>;

/// A named predicate over the environment. `Err` carries what to tell the user.
pub struct Check {
    pub name: &'static str,
    /// Whether a failure aborts the session when tests are strict.
    pub strict: bool,
    probe: Probe,
}

impl Check {
    pub fn new(
        name: &'static str,
        strict: bool,
        probe: impl Fn() -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self { name, strict, probe: Box::new(probe) }
    }
}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check").field("name", &self.name).field("strict", &self.strict).finish()
    }
}

#[derive(Debug, Default)]
pub struct Preflight {
    checks: Vec<Check>,
}

impl Preflight {
    /// No checks at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Display server and build profile.
    pub fn standard() -> Self {
        Self::none()
            .with(Check::new("display server", true, || {
                display_server_check(|key| std::env::var(key).ok())
            }))
            .with(Check::new("optimised build", true, build_profile_check))
    }

    pub fn with(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name).collect()
    }

    /// Runs every check. With `strict`, any failed strict check aborts with
    /// every strict failure listed; all other failures are warnings.
    pub fn run(&self, strict: bool) -> Result<(), SessionError> {
        let mut failures = Vec::new();
        for check in &self.checks {
            match (check.probe)() {
                Ok(()) => debug!("Preflight '{}' passed", check.name),
                Err(problem) if strict && check.strict => failures.push(problem),
                Err(problem) => warn!("Preflight '{}': {}", check.name, problem),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SessionError::EnvironmentUnsuitable { failures })
        }
    }
}

/// A running X server or Wayland compositor competes with the decoder for
/// the display and adds latency.
pub fn display_server_check(env: impl Fn(&str) -> Option<String>) -> Result<(), String> {
    if let Some(display) = env("DISPLAY").filter(|v| !v.is_empty()) {
        return Err(format!(
            "X server is probably running (DISPLAY={display}); exit it for lower latency"
        ));
    }
    if let Some(display) = env("WAYLAND_DISPLAY").filter(|v| !v.is_empty()) {
        return Err(format!(
            "Wayland compositor is probably running (WAYLAND_DISPLAY={display}); exit it for lower latency"
        ));
    }
    Ok(())
}

pub fn build_profile_check() -> Result<(), String> {
    if cfg!(debug_assertions) {
        Err("this is a debug build; rebuild with --release for usable performance".into())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn no_display_server_passes() {
        assert!(display_server_check(env(&[])).is_ok());
        assert!(display_server_check(env(&[("DISPLAY", "")])).is_ok());
    }

    #[test]
    fn x_server_is_named() {
        let err = display_server_check(env(&[("DISPLAY", ":0")])).unwrap_err();
        assert!(err.contains("X server"), "{err}");
        assert!(err.contains(":0"));
    }

    #[test]
    fn wayland_is_named() {
        let err = display_server_check(env(&[("WAYLAND_DISPLAY", "wayland-0")])).unwrap_err();
        assert!(err.contains("Wayland"), "{err}");
    }

    #[test]
    fn strict_failures_abort() {
        let preflight = Preflight::none()
            .with(Check::new("a", true, || Err("first".into())))
            .with(Check::new("b", false, || Err("advisory".into())))
            .with(Check::new("c", true, || Ok(())));

        match preflight.run(true) {
            Err(SessionError::EnvironmentUnsuitable { failures }) => {
                assert_eq!(failures, vec!["first".to_owned()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn lenient_run_only_warns() {
        let preflight = Preflight::none().with(Check::new("a", true, || Err("first".into())));
        assert!(preflight.run(false).is_ok());
    }

    #[test]
    fn standard_checks_are_named() {
        assert_eq!(Preflight::standard().names(), vec!["display server", "optimised build"]);
    }
}
