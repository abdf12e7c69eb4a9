// escrow-core/src/model/provider.rs

use crate::ports::store::{Collection, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfile {
  pub provider_id: String,
  #[serde(default)]
  pub email: Option<String>,
  /// Processor sub-account that receives escrow transfers.
  #[serde(default)]
  pub connected_account_id: Option<String>,
  pub updated_at: DateTime<Utc>,
}

impl Document for ProviderProfile {
  const COLLECTION: Collection = Collection::Providers;

  fn document_id(&self) -> &str {
    &self.provider_id
  }
}
