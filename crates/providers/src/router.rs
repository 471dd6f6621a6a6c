//! Provider router — picks a generative backend under the daily token budget.
//!
//! Routes are tried in priority order. A budgeted route is taken only when
//! the user's reservation succeeds; an unbudgeted route is always taken.
//! Each call is bounded by its route's timeout and never retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use threadsage_config::{AppConfig, ProviderEntry};
use threadsage_core::error::ProviderError;
use threadsage_core::provider::{GenerateRequest, GenerativeProvider, Generation};
use threadsage_core::store::TokenLedger;

use crate::budget::{TokenBudget, estimate_tokens};
use crate::gemini::GeminiProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// One entry in the priority list.
struct Route {
    provider: Arc<dyn GenerativeProvider>,
    timeout: Duration,
    budgeted: bool,
}

/// The outcome of a routed generation.
#[derive(Debug, Clone)]
pub struct Routed {
    pub generation: Generation,
    /// Name of the provider that answered.
    pub provider: String,
    /// Whether the answering route is gated by the budget.
    pub budgeted: bool,
    pub estimate: u64,
    /// Tokens written to the ledger for this call.
    pub tokens_charged: u64,
}

/// Routes generation requests across prioritized providers.
pub struct ProviderRouter {
    routes: Vec<Route>,
    budget: TokenBudget,
}

impl ProviderRouter {
    pub fn new(budget: TokenBudget) -> Self {
        Self {
            routes: Vec::new(),
            budget,
        }
    }

    /// Append a route with the lowest priority so far.
    pub fn add(
        mut self,
        provider: Arc<dyn GenerativeProvider>,
        timeout: Duration,
        budgeted: bool,
    ) -> Self {
        self.routes.push(Route {
            provider,
            timeout,
            budgeted,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    /// Names of the configured providers in priority order.
    pub fn list(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.provider.name()).collect()
    }

    /// Generate an answer for `user_id`, charging the budget.
    pub async fn generate(
        &self,
        user_id: &str,
        request: GenerateRequest,
    ) -> Result<Routed, ProviderError> {
        let today = Utc::now().date_naive();
        let estimate = estimate_tokens(&request.entries);
        let route = self.select(user_id, today, estimate).await?;
        let name = route.provider.name().to_string();

        info!(
            user_id,
            provider = %name,
            budgeted = route.budgeted,
            estimate,
            "Routing generation"
        );

        match Self::call(route, request).await {
            Ok(generation) => {
                let reported = generation.tokens_used.unwrap_or(estimate);
                if route.budgeted {
                    self.budget.settle(user_id, today, estimate, reported).await;
                } else {
                    self.budget.record(user_id, today, reported).await;
                }
                Ok(Routed {
                    generation,
                    provider: name,
                    budgeted: route.budgeted,
                    estimate,
                    tokens_charged: reported,
                })
            }
            Err(e) => {
                if route.budgeted {
                    self.budget.refund(user_id, today, estimate).await;
                }
                Err(e)
            }
        }
    }

    /// Generate on the lowest-priority route without touching the budget.
    ///
    /// Used for short housekeeping prompts such as thread titles.
    pub async fn generate_auxiliary(
        &self,
        request: GenerateRequest,
    ) -> Result<Generation, ProviderError> {
        let route = self
            .routes
            .last()
            .ok_or_else(|| ProviderError::NotConfigured("no providers configured".into()))?;
        Self::call(route, request).await
    }

    async fn select(
        &self,
        user_id: &str,
        today: chrono::NaiveDate,
        estimate: u64,
    ) -> Result<&Route, ProviderError> {
        for route in &self.routes {
            if !route.budgeted {
                return Ok(route);
            }
            match self.budget.try_reserve(user_id, today, estimate).await {
                Ok(true) => return Ok(route),
                Ok(false) => info!(
                    user_id,
                    provider = %route.provider.name(),
                    estimate,
                    limit = self.budget.daily_limit(),
                    "Daily token budget exhausted, skipping provider"
                ),
                Err(e) => warn!(
                    user_id,
                    provider = %route.provider.name(),
                    error = %e,
                    "Token ledger unavailable, skipping budgeted provider"
                ),
            }
        }

        Err(ProviderError::NotConfigured(
            "no provider available within the daily budget".into(),
        ))
    }

    async fn call(route: &Route, request: GenerateRequest) -> Result<Generation, ProviderError> {
        let name = route.provider.name();
        match tokio::time::timeout(route.timeout, route.provider.generate(request)).await {
            Ok(Ok(generation)) => Ok(generation),
            Ok(Err(e)) => {
                warn!(provider = %name, error = %e, "Provider call failed");
                Err(e)
            }
            Err(_) => {
                warn!(
                    provider = %name,
                    timeout_secs = route.timeout.as_secs(),
                    "Provider call timed out"
                );
                Err(ProviderError::Timeout(format!(
                    "Provider '{}' timed out after {}s",
                    name,
                    route.timeout.as_secs()
                )))
            }
        }
    }
}

/// Build the router from configuration.
pub fn build_from_config(config: &AppConfig, ledger: Arc<dyn TokenLedger>) -> ProviderRouter {
    let budget = TokenBudget::new(ledger, config.budget.daily_token_limit);
    config
        .providers
        .iter()
        .fold(ProviderRouter::new(budget), |router, entry| {
            router.add(
                build_provider(entry),
                Duration::from_secs(entry.timeout_secs),
                entry.budgeted,
            )
        })
}

fn build_provider(entry: &ProviderEntry) -> Arc<dyn GenerativeProvider> {
    let api_key = entry.api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        warn!(provider = %entry.name, "No API key configured");
    }

    match entry.kind.as_str() {
        "gemini" => {
            let mut provider = GeminiProvider::new(api_key, &entry.model).with_name(&entry.name);
            if let Some(url) = &entry.api_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        _ => Arc::new(OpenAiCompatProvider::new(
            &entry.name,
            entry
                .api_url
                .clone()
                .unwrap_or_else(|| crate::openai_compat::DEFAULT_BASE_URL.into()),
            api_key,
            &entry.model,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use threadsage_core::message::ContextEntry;
    use threadsage_store::InMemoryStore;

    /// A mock provider that answers with fixed text and usage.
    struct ScriptedProvider {
        name: String,
        tokens: Option<u64>,
        call_count: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(name: &str, tokens: Option<u64>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                tokens,
                call_count: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl GenerativeProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, _request: GenerateRequest) -> Result<Generation, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            Ok(Generation {
                text: format!("answer from {}", self.name),
                tokens_used: self.tokens,
                model: "mock".into(),
            })
        }
    }

    /// A mock provider that always fails.
    struct FailingProvider;

    #[async_trait]
    impl GenerativeProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _request: GenerateRequest) -> Result<Generation, ProviderError> {
            Err(ProviderError::ApiError {
                status_code: 500,
                message: "boom".into(),
            })
        }
    }

    /// A mock provider that never answers.
    struct HangingProvider;

    #[async_trait]
    impl GenerativeProvider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn generate(&self, _request: GenerateRequest) -> Result<Generation, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn request(text: &str) -> GenerateRequest {
        GenerateRequest::new(vec![ContextEntry::user(text)])
    }

    fn router_with(
        store: Arc<InMemoryStore>,
        limit: u64,
        primary: Arc<dyn GenerativeProvider>,
        secondary: Arc<dyn GenerativeProvider>,
    ) -> ProviderRouter {
        ProviderRouter::new(TokenBudget::new(store, limit))
            .add(primary, Duration::from_secs(5), true)
            .add(secondary, Duration::from_secs(5), false)
    }

    #[tokio::test]
    async fn primary_used_within_budget_and_charged_reported_tokens() {
        let store = Arc::new(InMemoryStore::new());
        let primary = ScriptedProvider::new("primary", Some(42));
        let secondary = ScriptedProvider::new("secondary", Some(7));
        let router = router_with(store.clone(), 1000, primary.clone(), secondary.clone());

        let routed = router.generate("u1", request("What is 2+2?")).await.unwrap();
        assert_eq!(routed.provider, "primary");
        assert!(routed.budgeted);
        assert_eq!(routed.estimate, 3);
        assert_eq!(routed.tokens_charged, 42);

        let today = Utc::now().date_naive();
        assert_eq!(store.daily_usage("u1", today).await.unwrap(), 42);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn secondary_used_when_budget_exhausted_and_usage_recorded() {
        let store = Arc::new(InMemoryStore::new());
        let today = Utc::now().date_naive();
        store.adjust("u1", today, 99).await.unwrap();

        let primary = ScriptedProvider::new("primary", Some(42));
        let secondary = ScriptedProvider::new("secondary", Some(7));
        let router = router_with(store.clone(), 100, primary.clone(), secondary.clone());

        // Eight characters estimate two tokens: 99 + 2 > 100.
        let routed = router.generate("u1", request("abcdefgh")).await.unwrap();
        assert_eq!(routed.provider, "secondary");
        assert!(!routed.budgeted);
        assert_eq!(primary.calls(), 0);
        assert_eq!(store.daily_usage("u1", today).await.unwrap(), 106);
    }

    #[tokio::test]
    async fn boundary_estimate_still_uses_primary() {
        let store = Arc::new(InMemoryStore::new());
        let today = Utc::now().date_naive();
        store.adjust("u1", today, 98).await.unwrap();

        let primary = ScriptedProvider::new("primary", None);
        let router = router_with(
            store.clone(),
            100,
            primary.clone(),
            ScriptedProvider::new("secondary", None),
        );

        let routed = router.generate("u1", request("abcdefgh")).await.unwrap();
        assert_eq!(routed.provider, "primary");
        // No usage reported: the estimate stays charged.
        assert_eq!(store.daily_usage("u1", today).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn primary_failure_is_not_retried_and_refunds() {
        let store = Arc::new(InMemoryStore::new());
        let secondary = ScriptedProvider::new("secondary", None);
        let router = router_with(
            store.clone(),
            1000,
            Arc::new(FailingProvider),
            secondary.clone(),
        );

        let err = router.generate("u1", request("hello")).await.unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status_code: 500, .. }));
        assert_eq!(secondary.calls(), 0);
        let today = Utc::now().date_naive();
        assert_eq!(store.daily_usage("u1", today).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_becomes_provider_error() {
        let store = Arc::new(InMemoryStore::new());
        let router = ProviderRouter::new(TokenBudget::new(store, 1000)).add(
            Arc::new(HangingProvider),
            Duration::from_millis(50),
            true,
        );

        let err = router.generate("u1", request("hello")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn auxiliary_uses_last_route_without_charging() {
        let store = Arc::new(InMemoryStore::new());
        let primary = ScriptedProvider::new("primary", Some(10));
        let secondary = ScriptedProvider::new("secondary", Some(10));
        let router = router_with(store.clone(), 1000, primary.clone(), secondary.clone());

        let generation = router
            .generate_auxiliary(request("title please"))
            .await
            .unwrap();
        assert_eq!(generation.text, "answer from secondary");
        assert_eq!(primary.calls(), 0);
        let today = Utc::now().date_naive();
        assert_eq!(store.daily_usage("u1", today).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn only_budgeted_routes_and_no_budget_is_an_error() {
        let store = Arc::new(InMemoryStore::new());
        let router = ProviderRouter::new(TokenBudget::new(store, 1)).add(
            ScriptedProvider::new("primary", None),
            Duration::from_secs(1),
            true,
        );
        let err = router
            .generate("u1", request("far more than one token"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn build_from_default_config() {
        let router = build_from_config(&AppConfig::default(), Arc::new(InMemoryStore::new()));
        assert_eq!(router.len(), 2);
        assert_eq!(router.list(), ["primary", "secondary"]);
    }
}
