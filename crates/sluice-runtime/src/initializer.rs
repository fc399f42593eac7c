//! Sandbox initializer
//!
//! Prepares the backend before real traffic is served. Runs at most once per
//! process; there is no retry here, restart policy belongs to the supervisor.
//!
//! A recipe is a JSON document naming the files of the backend bundle:
//!
//! ```json
//! {
//!   "files": [
//!     { "path": "backend/app.py", "url": "https://cdn.example/app.py", "sha256": "9f86d0..." }
//!   ],
//!   "entrypoint": ["python3", "backend/app.py"]
//! }
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sluice_core::constants::{
    BUNDLE_FILES_COUNT_MAX, BUNDLE_FILE_SIZE_BYTES_MAX, BUNDLE_SIZE_BYTES_MAX,
    RECIPE_SIZE_BYTES_MAX,
};
use sluice_core::{Error, Fetcher, HttpError, Result};
use sluice_sandbox::{Backend, Bundle, BundleFile};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// One file to download into the backend directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeFile {
    /// Relative install path
    pub path: String,
    /// Where to download it from
    pub url: String,
    /// Expected hex SHA-256 of the contents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Startup descriptor for the backend bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub files: Vec<RecipeFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
}

impl Recipe {
    /// Parse and validate a recipe document
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let recipe: Recipe = serde_json::from_slice(bytes)
            .map_err(|e| Error::initialization_failed(format!("malformed recipe: {}", e)))?;
        recipe.validate()?;
        Ok(recipe)
    }

    fn validate(&self) -> Result<()> {
        if self.files.len() > BUNDLE_FILES_COUNT_MAX {
            return Err(Error::initialization_failed(format!(
                "recipe lists {} files (limit: {})",
                self.files.len(),
                BUNDLE_FILES_COUNT_MAX
            )));
        }

        for file in &self.files {
            // Paths are checked up front so nothing is downloaded for a bad recipe
            BundleFile::new(file.path.clone(), Vec::<u8>::new())
                .resolve_under(Path::new("/"))
                .map_err(|e| Error::initialization_failed(e.to_string()))?;

            if let Some(expected) = &file.sha256 {
                if expected.len() != 64 || !expected.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(Error::initialization_failed(format!(
                        "invalid sha256 for {}",
                        file.path
                    )));
                }
            }
        }

        if let Some(entrypoint) = &self.entrypoint {
            if entrypoint.is_empty() || entrypoint[0].is_empty() {
                return Err(Error::initialization_failed("recipe entrypoint is empty"));
            }
        }

        Ok(())
    }
}

/// One-shot sandbox initializer
pub struct Initializer {
    fetcher: Option<Arc<dyn Fetcher>>,
    bundle_bytes_max: usize,
    used: bool,
}

impl Initializer {
    /// Create an initializer downloading through `fetcher`
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher: Some(fetcher),
            bundle_bytes_max: BUNDLE_SIZE_BYTES_MAX,
            used: false,
        }
    }

    /// Cap the total downloaded bundle size
    pub fn with_bundle_bytes_max(mut self, bytes: usize) -> Self {
        self.bundle_bytes_max = bytes.min(BUNDLE_SIZE_BYTES_MAX);
        self
    }

    /// Check if an initialization already ran
    pub fn is_used(&self) -> bool {
        self.used
    }

    fn claim(&mut self) -> Result<()> {
        if self.used {
            return Err(Error::initialization_failed("sandbox already initialized"));
        }
        self.used = true;
        Ok(())
    }

    /// No-op initialization for local and test runs
    pub async fn dummy_initialization(&mut self) -> Result<()> {
        self.claim()?;
        info!("Dummy sandbox initialization");
        Ok(())
    }

    /// Fetch the recipe at `recipe_url`, download the bundle, install it
    #[instrument(skip_all, fields(url = %recipe_url))]
    pub async fn initialize_sandbox(
        &mut self,
        recipe_url: &str,
        backend: &mut dyn Backend,
    ) -> Result<()> {
        self.claim()?;
        let fetcher = self
            .fetcher
            .clone()
            .ok_or_else(|| Error::initialization_failed("network client disposed"))?;

        info!("Initializing sandbox from recipe");

        let body = fetcher
            .fetch(recipe_url, RECIPE_SIZE_BYTES_MAX)
            .await
            .map_err(|e| Error::initialization_failed(format!("failed to fetch recipe: {}", e)))?;
        let recipe = Recipe::parse(&body)?;

        let bundle = download_bundle(fetcher.as_ref(), &recipe, self.bundle_bytes_max).await?;
        let files = bundle.files.len();
        let bytes = bundle.size_bytes();

        backend
            .install(bundle)
            .await
            .map_err(|e| Error::initialization_failed(format!("failed to install bundle: {}", e)))?;

        info!(files, bytes, "Sandbox initialized");
        Ok(())
    }

    /// Release the network client
    ///
    /// Returns true only for the call that released it.
    pub fn dispose(&mut self) -> bool {
        self.fetcher.take().is_some()
    }
}

async fn download_bundle(
    fetcher: &dyn Fetcher,
    recipe: &Recipe,
    bundle_bytes_max: usize,
) -> Result<Bundle> {
    let mut bundle = Bundle::new();
    let mut total_bytes = 0usize;

    for file in &recipe.files {
        // The whole bundle stays in memory until installed
        let remaining = bundle_bytes_max.saturating_sub(total_bytes);
        let max_bytes = remaining.min(BUNDLE_FILE_SIZE_BYTES_MAX);

        let contents = fetcher.fetch(&file.url, max_bytes).await.map_err(|e| {
            if matches!(e, HttpError::ResponseTooLarge { .. }) && max_bytes == remaining {
                Error::initialization_failed(format!(
                    "bundle exceeds {} bytes at {}: {}",
                    bundle_bytes_max, file.path, e
                ))
            } else {
                Error::initialization_failed(format!("failed to fetch {}: {}", file.path, e))
            }
        })?;
        total_bytes += contents.len();
        debug_assert!(total_bytes <= bundle_bytes_max);

        if let Some(expected) = &file.sha256 {
            let actual = format!("{:x}", Sha256::digest(&contents));
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(Error::initialization_failed(format!(
                    "checksum mismatch for {}: expected {}, got {}",
                    file.path, expected, actual
                )));
            }
        }

        debug!(path = %file.path, bytes = contents.len(), "Downloaded bundle file");
        bundle = bundle.with_file(BundleFile::new(file.path.clone(), contents));
    }

    if let Some(entrypoint) = &recipe.entrypoint {
        bundle = bundle.with_entrypoint(entrypoint.clone());
    }

    Ok(bundle)
}
