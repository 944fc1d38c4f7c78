//! Remote method, subscription and collection names the session relies on.

/// Readiness query, no arguments, returns `{isServerReady}`.
pub const METHOD_IS_SERVER_READY: &str = "isServerReady";

/// Login with a hashed token, `{userToken: {digest, algorithm}}`.
pub const METHOD_LOGIN: &str = "login";

/// Service registration, `(descriptor)` → `{serviceFound}`.
pub const METHOD_REGISTER_SERVICE: &str = "registerServiceDescriptor";

/// Data collection discovery, no arguments, returns `[string]`.
pub const METHOD_DATA_COLLECTION_NAMES: &str = "getUserDataCollectionNames";

/// Action acknowledgement, `(actionId, result, error)`.
pub const METHOD_ACTION_CALLBACK: &str = "actionCallback";

/// Liveness ping, no arguments, returns `{connectionEstablished}`.
pub const METHOD_SERVICE_PING: &str = "externalServicePing";

/// Control channel subscription (no arguments).
pub const SUBSCRIPTION_CONTROL: &str = "externalServiceQueue";

/// Data subscription, `(collectionName, {fields})`.
pub const SUBSCRIPTION_SERVICE_DATA: &str = "subscribeToServiceData";

/// Collection fed by the control channel subscription.
pub const COLLECTION_CONTROL: &str = "queue";

/// HTTP path of the server status endpoint.
pub const STATUS_PATH: &str = "/status";
