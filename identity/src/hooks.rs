//! # Extension Pipeline - Hook Executor
//!
//! A typed registry of lifecycle hooks, one trait per hook kind rather than
//! a single generic `Hook<In, Out>` - fold hooks already transform a
//! distinct concrete struct per kind, so a generic trait would only add an
//! enum-per-kind payload without buying any safety. Each [`HookExecutor`]
//! is built with one [`FailureStrategy`] applied uniformly across every
//! kind it hosts, per spec.md §4.E / §9's Design Notes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::domain::{FieldUpdate, UserProfile};
use crate::error::{HookFailure, IdentityError};

/// How a [`HookExecutor`] reacts to a hook implementation raising an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStrategy {
    /// First error propagates immediately; remaining hooks are skipped.
    FailFast,
    /// Every hook runs; if any failed, a composite [`IdentityError::HookExecution`] is raised afterward.
    CollectErrors,
    /// A failing hook is logged and its transformation skipped; the prior value passes through.
    SkipFailed,
}

impl Default for FailureStrategy {
    fn default() -> Self {
        FailureStrategy::FailFast
    }
}

/// Input/output of the `beforeUserCreate` fold chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreateData {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: String,
    pub custom_attributes: HashMap<String, String>,
    pub profile: Option<UserProfile>,
}

/// Input/output of the `beforeUserUpdate` fold chain.
#[derive(Debug, Clone)]
pub struct UserUpdateData {
    pub user_id: Uuid,
    pub email: FieldUpdate<String>,
    pub phone: FieldUpdate<String>,
}

/// Input/output of the `beforeProfileUpdate` fold chain.
#[derive(Debug, Clone)]
pub struct UserProfileUpdateData {
    pub user_id: Uuid,
    pub first_name: FieldUpdate<String>,
    pub last_name: FieldUpdate<String>,
    pub address: FieldUpdate<String>,
    pub profile_picture: FieldUpdate<String>,
}

/// Input/output of the `beforeCustomAttributesUpdate` fold chain.
#[derive(Debug, Clone)]
pub struct CustomAttributesUpdateData {
    pub user_id: Uuid,
    pub attributes: HashMap<String, String>,
}

#[async_trait]
pub trait BeforeUserCreate: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, input: UserCreateData) -> Result<UserCreateData, IdentityError>;
}

#[async_trait]
pub trait BeforeUserUpdate: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, input: UserUpdateData) -> Result<UserUpdateData, IdentityError>;
}

#[async_trait]
pub trait BeforeProfileUpdate: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, input: UserProfileUpdateData) -> Result<UserProfileUpdateData, IdentityError>;
}

#[async_trait]
pub trait BeforeCustomAttributesUpdate: Send + Sync {
    fn name(&self) -> &str;
    async fn call(
        &self,
        input: CustomAttributesUpdateData,
    ) -> Result<CustomAttributesUpdateData, IdentityError>;
}

#[async_trait]
pub trait BeforeLogin: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, identifier: String) -> Result<String, IdentityError>;
}

/// Fan-out only - every implementation runs for every call; its result is
/// logged on failure and otherwise discarded (spec.md §4.E: "results ignored").
#[async_trait]
pub trait AfterLoginFailure: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, identifier: &str) -> Result<(), IdentityError>;
}

struct Entry<H: ?Sized> {
    priority: i32,
    seq: usize,
    handler: std::sync::Arc<H>,
}

impl<H: ?Sized> Clone for Entry<H> {
    fn clone(&self) -> Self {
        Self {
            priority: self.priority,
            seq: self.seq,
            handler: self.handler.clone(),
        }
    }
}

fn insert_sorted<H: ?Sized>(entries: &mut Vec<Entry<H>>, entry: Entry<H>) {
    entries.push(entry);
    entries.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.seq.cmp(&b.seq)));
}

/// Chains typed hooks across registered extensions under one failure
/// strategy, fixed at construction (spec.md §4.E, §9).
#[derive(Default)]
pub struct HookExecutor {
    strategy: FailureStrategy,
    seq: AtomicUsize,
    before_user_create: Vec<Entry<dyn BeforeUserCreate>>,
    before_user_update: Vec<Entry<dyn BeforeUserUpdate>>,
    before_profile_update: Vec<Entry<dyn BeforeProfileUpdate>>,
    before_custom_attributes_update: Vec<Entry<dyn BeforeCustomAttributesUpdate>>,
    before_login: Vec<Entry<dyn BeforeLogin>>,
    after_login_failure: Vec<Entry<dyn AfterLoginFailure>>,
}

impl HookExecutor {
    pub fn new(strategy: FailureStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    fn next_seq(&self) -> usize {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_before_user_create(
        &mut self,
        priority: i32,
        handler: std::sync::Arc<dyn BeforeUserCreate>,
    ) {
        let seq = self.next_seq();
        insert_sorted(&mut self.before_user_create, Entry { priority, seq, handler });
    }

    pub fn register_before_user_update(
        &mut self,
        priority: i32,
        handler: std::sync::Arc<dyn BeforeUserUpdate>,
    ) {
        let seq = self.next_seq();
        insert_sorted(&mut self.before_user_update, Entry { priority, seq, handler });
    }

    pub fn register_before_profile_update(
        &mut self,
        priority: i32,
        handler: std::sync::Arc<dyn BeforeProfileUpdate>,
    ) {
        let seq = self.next_seq();
        insert_sorted(&mut self.before_profile_update, Entry { priority, seq, handler });
    }

    pub fn register_before_custom_attributes_update(
        &mut self,
        priority: i32,
        handler: std::sync::Arc<dyn BeforeCustomAttributesUpdate>,
    ) {
        let seq = self.next_seq();
        insert_sorted(
            &mut self.before_custom_attributes_update,
            Entry { priority, seq, handler },
        );
    }

    pub fn register_before_login(&mut self, priority: i32, handler: std::sync::Arc<dyn BeforeLogin>) {
        let seq = self.next_seq();
        insert_sorted(&mut self.before_login, Entry { priority, seq, handler });
    }

    pub fn register_after_login_failure(
        &mut self,
        priority: i32,
        handler: std::sync::Arc<dyn AfterLoginFailure>,
    ) {
        let seq = self.next_seq();
        insert_sorted(&mut self.after_login_failure, Entry { priority, seq, handler });
    }

    pub async fn run_before_user_create(
        &self,
        input: UserCreateData,
    ) -> Result<UserCreateData, IdentityError> {
        let mut value = input;
        let mut failures = Vec::new();
        for entry in &self.before_user_create {
            match entry.handler.call(value.clone()).await {
                Ok(next) => value = next,
                Err(e) => {
                    tracing::warn!(hook = entry.handler.name(), error = %e, "beforeUserCreate hook failed");
                    failures.push(HookFailure {
                        hook_name: entry.handler.name().to_string(),
                        cause: e.to_string(),
                    });
                    if self.strategy == FailureStrategy::FailFast {
                        return Err(e);
                    }
                }
            }
        }
        self.finish(value, failures)
    }

    pub async fn run_before_user_update(
        &self,
        input: UserUpdateData,
    ) -> Result<UserUpdateData, IdentityError> {
        let mut value = input;
        let mut failures = Vec::new();
        for entry in &self.before_user_update {
            match entry.handler.call(value.clone()).await {
                Ok(next) => value = next,
                Err(e) => {
                    tracing::warn!(hook = entry.handler.name(), error = %e, "beforeUserUpdate hook failed");
                    failures.push(HookFailure {
                        hook_name: entry.handler.name().to_string(),
                        cause: e.to_string(),
                    });
                    if self.strategy == FailureStrategy::FailFast {
                        return Err(e);
                    }
                }
            }
        }
        self.finish(value, failures)
    }

    pub async fn run_before_profile_update(
        &self,
        input: UserProfileUpdateData,
    ) -> Result<UserProfileUpdateData, IdentityError> {
        let mut value = input;
        let mut failures = Vec::new();
        for entry in &self.before_profile_update {
            match entry.handler.call(value.clone()).await {
                Ok(next) => value = next,
                Err(e) => {
                    tracing::warn!(hook = entry.handler.name(), error = %e, "beforeProfileUpdate hook failed");
                    failures.push(HookFailure {
                        hook_name: entry.handler.name().to_string(),
                        cause: e.to_string(),
                    });
                    if self.strategy == FailureStrategy::FailFast {
                        return Err(e);
                    }
                }
            }
        }
        self.finish(value, failures)
    }

    pub async fn run_before_custom_attributes_update(
        &self,
        input: CustomAttributesUpdateData,
    ) -> Result<CustomAttributesUpdateData, IdentityError> {
        let mut value = input;
        let mut failures = Vec::new();
        for entry in &self.before_custom_attributes_update {
            match entry.handler.call(value.clone()).await {
                Ok(next) => value = next,
                Err(e) => {
                    tracing::warn!(hook = entry.handler.name(), error = %e, "beforeCustomAttributesUpdate hook failed");
                    failures.push(HookFailure {
                        hook_name: entry.handler.name().to_string(),
                        cause: e.to_string(),
                    });
                    if self.strategy == FailureStrategy::FailFast {
                        return Err(e);
                    }
                }
            }
        }
        self.finish(value, failures)
    }

    pub async fn run_before_login(&self, identifier: String) -> Result<String, IdentityError> {
        let mut value = identifier;
        let mut failures = Vec::new();
        for entry in &self.before_login {
            match entry.handler.call(value.clone()).await {
                Ok(next) => value = next,
                Err(e) => {
                    tracing::warn!(hook = entry.handler.name(), error = %e, "beforeLogin hook failed");
                    failures.push(HookFailure {
                        hook_name: entry.handler.name().to_string(),
                        cause: e.to_string(),
                    });
                    if self.strategy == FailureStrategy::FailFast {
                        return Err(e);
                    }
                }
            }
        }
        self.finish(value, failures)
    }

    /// Fan-out: every hook runs unconditionally; failures are logged and
    /// otherwise discarded, per spec.md §4.E.
    pub async fn run_after_login_failure(&self, identifier: &str) {
        for entry in &self.after_login_failure {
            if let Err(e) = entry.handler.call(identifier).await {
                tracing::warn!(hook = entry.handler.name(), error = %e, "afterLoginFailure hook failed");
            }
        }
    }

    fn finish<T>(&self, value: T, failures: Vec<HookFailure>) -> Result<T, IdentityError> {
        if self.strategy == FailureStrategy::CollectErrors && !failures.is_empty() {
            return Err(IdentityError::HookExecution {
                message: format!("{} hook(s) failed", failures.len()),
                failures,
            });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Uppercase;
    #[async_trait]
    impl BeforeLogin for Uppercase {
        fn name(&self) -> &str {
            "uppercase"
        }
        async fn call(&self, identifier: String) -> Result<String, IdentityError> {
            Ok(identifier.to_uppercase())
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl BeforeLogin for AlwaysFails {
        fn name(&self) -> &str {
            "always_fails"
        }
        async fn call(&self, _identifier: String) -> Result<String, IdentityError> {
            Err(IdentityError::Unknown("boom".into()))
        }
    }

    struct Suffix(&'static str);
    #[async_trait]
    impl BeforeLogin for Suffix {
        fn name(&self) -> &str {
            "suffix"
        }
        async fn call(&self, identifier: String) -> Result<String, IdentityError> {
            Ok(format!("{identifier}{}", self.0))
        }
    }

    #[tokio::test]
    async fn fold_composes_in_priority_order() {
        let mut executor = HookExecutor::new(FailureStrategy::FailFast);
        executor.register_before_login(10, Arc::new(Suffix("-b")));
        executor.register_before_login(0, Arc::new(Uppercase));
        let result = executor.run_before_login("alice".to_string()).await.unwrap();
        assert_eq!(result, "ALICE-b");
    }

    #[tokio::test]
    async fn fail_fast_stops_remaining_hooks() {
        let mut executor = HookExecutor::new(FailureStrategy::FailFast);
        executor.register_before_login(0, Arc::new(Uppercase));
        executor.register_before_login(1, Arc::new(AlwaysFails));
        executor.register_before_login(2, Arc::new(Suffix("-never")));
        let result = executor.run_before_login("alice".to_string()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn skip_failed_passes_through_prior_value() {
        let mut executor = HookExecutor::new(FailureStrategy::SkipFailed);
        executor.register_before_login(0, Arc::new(Uppercase));
        executor.register_before_login(1, Arc::new(AlwaysFails));
        executor.register_before_login(2, Arc::new(Suffix("-b")));
        let result = executor.run_before_login("alice".to_string()).await.unwrap();
        assert_eq!(result, "ALICE-b");
    }

    #[tokio::test]
    async fn collect_errors_runs_everything_then_raises() {
        let mut executor = HookExecutor::new(FailureStrategy::CollectErrors);
        executor.register_before_login(0, Arc::new(Uppercase));
        executor.register_before_login(1, Arc::new(AlwaysFails));
        executor.register_before_login(2, Arc::new(Suffix("-b")));
        let result = executor.run_before_login("alice".to_string()).await;
        match result {
            Err(IdentityError::HookExecution { failures, .. }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].hook_name, "always_fails");
            }
            other => panic!("expected HookExecution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fan_out_runs_every_hook_regardless_of_failure() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counter(Arc<AtomicUsize>);
        #[async_trait]
        impl AfterLoginFailure for Counter {
            fn name(&self) -> &str {
                "counter"
            }
            async fn call(&self, _identifier: &str) -> Result<(), IdentityError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(IdentityError::Unknown("ignored".into()))
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let mut executor = HookExecutor::new(FailureStrategy::FailFast);
        executor.register_after_login_failure(0, Arc::new(Counter(count.clone())));
        executor.register_after_login_failure(1, Arc::new(Counter(count.clone())));
        executor.run_after_login_failure("alice").await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
