//! Per-form-factor test blacklisting.
//!
//! Some shell tests only make sense on some device classes. A test method can
//! carry a [`Blacklist`] of form factors; when the test context reports one of
//! them, the method is replaced by a no-op for that run.
//!
//! Blacklists are attached explicitly when a method is registered in a
//! [`TestSuite`], and the decision is made by [`gate`] right before each
//! method would run. Nothing else about the context is intercepted.
//!
//! The decision table is:
//!
//! | name starts with `test_` | has blacklist | form factor in blacklist | result   |
//! |--------------------------|---------------|--------------------------|----------|
//! | no                       | any           | any                      | original |
//! | yes                      | no            | -                        | original |
//! | yes                      | yes           | no                       | original |
//! | yes                      | yes           | yes                      | no-op    |
//!
//! # Example
//!
//! ```
//! use shellpilot_core::form_factor::{FormFactor, FormFactorSource};
//! use shellpilot_core::gatekeeper::{TestMethod, TestSuite};
//!
//! struct Phone;
//! impl FormFactorSource for Phone {
//!     fn form_factor(&self) -> FormFactor {
//!         FormFactor::Phone
//!     }
//! }
//!
//! let mut suite = TestSuite::new();
//! suite
//!     .register(TestMethod::new("test_launcher_reveal", |_: &mut Phone| Ok(()))
//!         .blacklist([FormFactor::Phone]))
//!     .unwrap();
//!
//! let report = suite.run(&mut Phone);
//! assert_eq!(report.skipped(), 1);
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info};

use crate::form_factor::{FormFactor, FormFactorSource, UnknownFormFactor};

/// Name prefix identifying a test entry point.
pub const TEST_PREFIX: &str = "test_";

/// Result of a test body.
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Errors raised while building blacklists or suites.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// A blacklist named an unknown form factor.
    #[error(transparent)]
    UnknownFormFactor(#[from] UnknownFormFactor),

    /// Two methods with the same name were registered.
    #[error("test method '{0}' is already registered")]
    DuplicateMethod(String),
}

/// Returns true if `name` identifies a test entry point.
pub fn is_test_entry(name: &str) -> bool {
    name.starts_with(TEST_PREFIX)
}

/// The set of form factors a test must be skipped on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blacklist(BTreeSet<FormFactor>);

impl Blacklist {
    pub fn of(form_factors: impl IntoIterator<Item = FormFactor>) -> Self {
        Self(form_factors.into_iter().collect())
    }

    pub fn contains(&self, form_factor: FormFactor) -> bool {
        self.0.contains(&form_factor)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = FormFactor> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<FormFactor> for Blacklist {
    fn from_iter<I: IntoIterator<Item = FormFactor>>(iter: I) -> Self {
        Self::of(iter)
    }
}

impl FromStr for Blacklist {
    type Err = GateError;

    /// Parses a comma-separated list such as `"phone,tablet"`. Empty entries
    /// are ignored; unknown names are an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<FormFactor>().map_err(GateError::from))
            .collect()
    }
}

impl fmt::Display for Blacklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(FormFactor::as_str).collect();
        f.write_str(&names.join(","))
    }
}

/// Whether a member should run as-is or be replaced by a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Run,
    Skip { form_factor: FormFactor },
}

/// Decide whether the member `name` runs on `current`.
///
/// Only a test entry point whose blacklist contains `current` is skipped.
pub fn gate(name: &str, blacklist: Option<&Blacklist>, current: FormFactor) -> Verdict {
    match blacklist {
        Some(blacklist) if is_test_entry(name) && blacklist.contains(current) => Verdict::Skip {
            form_factor: current,
        },
        _ => Verdict::Run,
    }
}

/// A registered method of a test context `C`.
pub struct TestMethod<C> {
    name: String,
    blacklist: Option<Blacklist>,
    body: fn(&mut C) -> TestResult,
}

impl<C> TestMethod<C> {
    pub fn new(name: impl Into<String>, body: fn(&mut C) -> TestResult) -> Self {
        Self {
            name: name.into(),
            blacklist: None,
            body,
        }
    }

    /// Attach blacklist metadata to this method.
    pub fn blacklist(mut self, form_factors: impl IntoIterator<Item = FormFactor>) -> Self {
        self.blacklist = Some(Blacklist::of(form_factors));
        self
    }

    /// Attach an already-built blacklist.
    pub fn with_blacklist(mut self, blacklist: Blacklist) -> Self {
        self.blacklist = Some(blacklist);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blacklist_metadata(&self) -> Option<&Blacklist> {
        self.blacklist.as_ref()
    }

    pub fn is_test_entry(&self) -> bool {
        is_test_entry(&self.name)
    }

    /// Resolve this method for the given form factor.
    pub fn resolve(&self, current: FormFactor) -> Resolved<'_, C> {
        match gate(&self.name, self.blacklist.as_ref(), current) {
            Verdict::Run => Resolved::Original(self),
            Verdict::Skip { form_factor } => Resolved::NoOp { form_factor },
        }
    }
}

impl<C> fmt::Debug for TestMethod<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestMethod")
            .field("name", &self.name)
            .field("blacklist", &self.blacklist)
            .finish_non_exhaustive()
    }
}

/// A method as resolved for one access: either the original or a no-op.
pub enum Resolved<'a, C> {
    Original(&'a TestMethod<C>),
    NoOp { form_factor: FormFactor },
}

impl<C> Resolved<'_, C> {
    pub fn is_noop(&self) -> bool {
        matches!(self, Resolved::NoOp { .. })
    }

    /// Invoke the resolved member. The no-op ignores `ctx` and succeeds.
    pub fn call(&self, ctx: &mut C) -> TestResult {
        match self {
            Resolved::Original(method) => (method.body)(ctx),
            Resolved::NoOp { .. } => Ok(()),
        }
    }
}

/// Outcome of one test method in a suite run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(String),
    Skipped(FormFactor),
}

/// Per-method outcomes of a [`TestSuite::run`], in registration order.
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub outcomes: Vec<(String, Outcome)>,
}

impl SuiteReport {
    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| o)
    }
}

/// Ordered registry of methods for a test context `C`.
///
/// Only test entry points are run by [`run`](Self::run); other registered
/// members are helpers reachable through [`resolve`](Self::resolve).
pub struct TestSuite<C> {
    methods: Vec<TestMethod<C>>,
}

impl<C> fmt::Debug for TestSuite<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSuite")
            .field("methods", &self.methods)
            .finish()
    }
}

impl<C> Default for TestSuite<C> {
    fn default() -> Self {
        Self { methods: Vec::new() }
    }
}

impl<C> TestSuite<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method. Names must be unique.
    pub fn register(&mut self, method: TestMethod<C>) -> Result<&mut Self, GateError> {
        if self.methods.iter().any(|m| m.name == method.name) {
            return Err(GateError::DuplicateMethod(method.name));
        }
        self.methods.push(method);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Look up a member by name and resolve it for `current`.
    pub fn resolve(&self, name: &str, current: FormFactor) -> Option<Resolved<'_, C>> {
        self.methods
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.resolve(current))
    }
}

impl<C: FormFactorSource> TestSuite<C> {
    /// Run every test entry point against `ctx`.
    ///
    /// The form factor is asked from `ctx` before each method, so a body that
    /// changes it affects the methods after it.
    pub fn run(&self, ctx: &mut C) -> SuiteReport {
        let mut report = SuiteReport::default();

        for method in self.methods.iter().filter(|m| m.is_test_entry()) {
            let resolved = method.resolve(ctx.form_factor());
            let outcome = match resolved {
                Resolved::NoOp { form_factor } => {
                    info!(test = %method.name, %form_factor, "Skipping blacklisted test");
                    Outcome::Skipped(form_factor)
                }
                Resolved::Original(_) => match resolved.call(ctx) {
                    Ok(()) => Outcome::Passed,
                    Err(e) => Outcome::Failed(e.to_string()),
                },
            };
            debug!(test = %method.name, ?outcome, "Test finished");
            report.outcomes.push((method.name.clone(), outcome));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Ctx {
        form_factor: Option<FormFactor>,
        calls: Vec<&'static str>,
    }

    impl FormFactorSource for Ctx {
        fn form_factor(&self) -> FormFactor {
            self.form_factor.unwrap_or(FormFactor::Desktop)
        }
    }

    fn phone() -> Ctx {
        Ctx {
            form_factor: Some(FormFactor::Phone),
            ..Default::default()
        }
    }

    fn test_foo(ctx: &mut Ctx) -> TestResult {
        ctx.calls.push("test_foo");
        Ok(())
    }

    #[test]
    fn decision_table() {
        let phone_only = Blacklist::of([FormFactor::Phone]);
        let p = FormFactor::Phone;
        let d = FormFactor::Desktop;

        assert_eq!(gate("helper_foo", Some(&phone_only), p), Verdict::Run);
        assert_eq!(gate("test_foo", None, p), Verdict::Run);
        assert_eq!(gate("test_foo", Some(&phone_only), d), Verdict::Run);
        assert_eq!(
            gate("test_foo", Some(&phone_only), p),
            Verdict::Skip { form_factor: p }
        );
    }

    #[test]
    fn empty_blacklist_never_skips() {
        for ff in FormFactor::ALL {
            assert_eq!(gate("test_foo", Some(&Blacklist::default()), ff), Verdict::Run);
        }
    }

    #[test]
    fn desktop_runs_phone_blacklisted_method() {
        let method = TestMethod::new("test_foo", test_foo).blacklist([FormFactor::Phone]);
        let mut ctx = Ctx::default();

        let resolved = method.resolve(ctx.form_factor());
        assert!(!resolved.is_noop());
        resolved.call(&mut ctx).unwrap();
        assert_eq!(ctx.calls, ["test_foo"]);
    }

    #[test]
    fn phone_gets_noop() {
        let method = TestMethod::new("test_foo", test_foo).blacklist([FormFactor::Phone]);
        let mut ctx = phone();

        let resolved = method.resolve(ctx.form_factor());
        assert!(resolved.is_noop());
        resolved.call(&mut ctx).unwrap();
        assert!(ctx.calls.is_empty());
    }

    #[test]
    fn noop_ignores_failing_body() {
        let method: TestMethod<Ctx> =
            TestMethod::new("test_broken", |_| Err("should never run".into())).blacklist([FormFactor::Phone]);
        assert!(method.resolve(FormFactor::Phone).call(&mut phone()).is_ok());
    }

    #[test]
    fn helper_never_substituted() {
        let method = TestMethod::new("helper_foo", test_foo).blacklist(FormFactor::ALL);
        for ff in FormFactor::ALL {
            assert!(!method.resolve(ff).is_noop());
        }
    }

    #[test]
    fn parse_blacklist() {
        let bl: Blacklist = "phone, Tablet,".parse().unwrap();
        assert!(bl.contains(FormFactor::Phone));
        assert!(bl.contains(FormFactor::Tablet));
        assert!(!bl.contains(FormFactor::Desktop));
        assert_eq!(bl.to_string(), "phone,tablet");

        let err = "phone,watch".parse::<Blacklist>().unwrap_err();
        assert!(err.to_string().contains("watch"));

        assert!("".parse::<Blacklist>().unwrap().is_empty());
    }

    #[test]
    fn suite_runs_only_test_entries() {
        let mut suite = TestSuite::new();
        suite
            .register(TestMethod::new("helper_setup", |ctx: &mut Ctx| {
                ctx.calls.push("helper_setup");
                Ok(())
            }))
            .unwrap()
            .register(TestMethod::new("test_foo", test_foo))
            .unwrap();

        let mut ctx = Ctx::default();
        let report = suite.run(&mut ctx);

        assert_eq!(ctx.calls, ["test_foo"]);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.passed(), 1);
    }

    #[test]
    fn suite_reports_skips_and_failures() {
        let mut suite = TestSuite::new();
        suite
            .register(TestMethod::new("test_foo", test_foo).blacklist([FormFactor::Phone]))
            .unwrap()
            .register(TestMethod::new("test_fails", |_: &mut Ctx| Err("dash missing".into())))
            .unwrap()
            .register(TestMethod::new("test_tablet_only", test_foo).blacklist([FormFactor::Tablet]))
            .unwrap();

        let mut ctx = phone();
        let report = suite.run(&mut ctx);

        assert_eq!(report.outcome("test_foo"), Some(&Outcome::Skipped(FormFactor::Phone)));
        assert_eq!(report.outcome("test_fails"), Some(&Outcome::Failed("dash missing".to_string())));
        assert_eq!(report.outcome("test_tablet_only"), Some(&Outcome::Passed));
        assert_eq!((report.passed(), report.failed(), report.skipped()), (1, 1, 1));
        assert!(!report.is_success());
        assert_eq!(ctx.calls, ["test_foo"]);
    }

    #[test]
    fn form_factor_reevaluated_per_method() {
        let mut suite = TestSuite::new();
        suite
            .register(TestMethod::new("test_become_phone", |ctx: &mut Ctx| {
                ctx.form_factor = Some(FormFactor::Phone);
                Ok(())
            }))
            .unwrap()
            .register(TestMethod::new("test_foo", test_foo).blacklist([FormFactor::Phone]))
            .unwrap();

        let mut ctx = Ctx::default();
        let report = suite.run(&mut ctx);
        assert_eq!(report.outcome("test_foo"), Some(&Outcome::Skipped(FormFactor::Phone)));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut suite = TestSuite::new();
        suite.register(TestMethod::new("test_foo", test_foo)).unwrap();
        let err = suite.register(TestMethod::new("test_foo", test_foo)).unwrap_err();
        assert_eq!(err, GateError::DuplicateMethod("test_foo".to_string()));
        assert_eq!(suite.len(), 1);
    }

    #[test]
    fn suite_debug_lists_methods() {
        let mut suite = TestSuite::new();
        suite
            .register(TestMethod::new("test_foo", test_foo).blacklist([FormFactor::Phone]))
            .unwrap();

        let debug = format!("{:?}", suite);
        assert!(debug.starts_with("TestSuite"));
        assert!(debug.contains("test_foo"));
        assert!(debug.contains("Phone"));
    }

    #[test]
    fn resolve_by_name() {
        let mut suite = TestSuite::new();
        suite
            .register(TestMethod::new("test_foo", test_foo).blacklist([FormFactor::Desktop]))
            .unwrap();

        assert!(suite.resolve("test_foo", FormFactor::Desktop).unwrap().is_noop());
        assert!(!suite.resolve("test_foo", FormFactor::Phone).unwrap().is_noop());
        assert!(suite.resolve("test_missing", FormFactor::Phone).is_none());
    }
}
