/// Application name
pub const APP_NAME: &str = "Atelier";

/// Lifetime generation allowance per user identity
pub const MAX_GENERATIONS_PER_USER: u32 = 3;

/// Maximum number of gallery records kept per user identity
pub const MAX_IMAGES_PER_USER: usize = 100;

/// Maximum serialized size of the whole gallery collection in bytes (5 MiB)
pub const MAX_GALLERY_BYTES: usize = 5 * 1024 * 1024;

/// Fraction of records kept (newest first) when the gallery exceeds its
/// byte cap
pub const GALLERY_KEEP_RATIO: f64 = 0.8;

/// Default capacity of a key-value store slot in bytes (10 MiB)
pub const KV_DEFAULT_CAPACITY: usize = 10 * 1024 * 1024;

/// Storage key for the persisted user session
pub const SESSION_STORAGE_KEY: &str = "atelier-user-session";

/// Storage key for the per-user generation quota records
pub const QUOTA_STORAGE_KEY: &str = "atelier-generation-limits";

/// Storage key for the local gallery collection
pub const GALLERY_STORAGE_KEY: &str = "atelier-gallery-images";

/// User id handed out when the session store is unavailable
pub const FALLBACK_USER_ID: &str = "fallback-user";

/// Fingerprint recorded for the fallback session
pub const FALLBACK_FINGERPRINT: &str = "unavailable";

/// File name prefix for server-side image artifacts
pub const ARTIFACT_PREFIX: &str = "ai-generated-";

/// File extensions recognised as image artifacts
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default request body limit in bytes (20 MiB), sized for inline
/// base64-encoded source images
pub const DEFAULT_MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Default generative-image model
pub const DEFAULT_PROVIDER_MODEL: &str = "gemini-2.0-flash-preview-image-generation";

/// Default provider API endpoint
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Fixed preamble prepended to every user prompt sent to the provider
pub const PROMPT_PREAMBLE: &str =
    "Generate a single high-quality image for the following description. \
     Do not include any text, watermarks or borders in the image.";

/// Default interval between mirror sync passes in seconds
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Interval at which the storage watcher polls for external changes
pub const STORAGE_POLL_INTERVAL_SECS: u64 = 60;
