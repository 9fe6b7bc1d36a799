use proptest::prelude::*;
use tasker_batch::config::BackoffConfig;
use tasker_batch::state_machine::ContextState;

/// Strategy for generating valid item identifiers
pub fn item_id_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,31}"
}

/// Strategy for generating batches of unique item identifiers
pub fn item_ids_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set(item_id_strategy(), 0..64)
        .prop_map(|ids| ids.into_iter().collect())
}

/// Strategy for generating valid chunk sizes
pub fn chunk_size_strategy() -> impl Strategy<Value = usize> {
    1usize..=20
}

/// Strategy for generating terminal item states
pub fn terminal_state_strategy() -> impl Strategy<Value = ContextState> {
    prop_oneof![
        Just(ContextState::Completed),
        Just(ContextState::Failed),
        Just(ContextState::Cancelled),
    ]
}

/// Strategy for generating valid backoff configurations
pub fn backoff_config_strategy() -> impl Strategy<Value = BackoffConfig> {
    (1u64..1_000, 1u64..100, 1.0f64..4.0, any::<bool>(), 0.0f64..1.0).prop_map(
        |(base_delay_ms, cap_factor, multiplier, jitter_enabled, max_jitter)| BackoffConfig {
            base_delay_ms,
            max_delay_ms: base_delay_ms * cap_factor,
            multiplier,
            jitter_enabled,
            max_jitter,
        },
    )
}
