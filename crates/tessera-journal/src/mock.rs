use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterRegistry, JsonAdapter};

pub(crate) use tessera_dispatch::testing::RecordingDispatcher;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum AccountEvent {
    Opened { owner: String },
    Deposited { amount: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Balance(pub u64);

pub(crate) fn account_registry() -> AdapterRegistry {
    AdapterRegistry::new()
        .with_entry_adapter::<AccountEvent, _>(JsonAdapter::<AccountEvent>::default())
        .with_state_adapter::<Balance, _>(JsonAdapter::<Balance>::default())
}
