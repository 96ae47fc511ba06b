//! VM image references
//!
//! Resolves the configured registry and image name into the reference passed
//! to the VM tool, and into the on-disk location of the cached image.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::RegistryConfig;

/// Returns the full registry path of the configured image
///
/// - empty registry URL: the image name verbatim
/// - image name already prefixed with the registry URL: used as-is
/// - otherwise: `<registry_url>/<image_name>`
pub fn registry_path(registry_url: &str, image_name: &str) -> String {
    if registry_url.is_empty() {
        return image_name.to_string();
    }

    let prefix = format!("{}/", registry_url);
    if image_name.starts_with(&prefix) {
        return image_name.to_string();
    }

    format!("{}/{}", registry_url, image_name)
}

/// Returns the cache location of an image under `cache_root`
///
/// The tag separator becomes a path separator, so `ghcr.io/org/runner:latest`
/// maps to `<cache_root>/ghcr.io/org/runner/latest`.
pub fn cache_path(cache_root: &Path, registry_path: &str) -> PathBuf {
    cache_root.join(registry_path.replace(':', "/"))
}

/// Image naming derived from the registry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    /// Image name as configured
    pub local_ref: String,

    /// Full registry path used for pulls
    pub registry_path: String,
}

impl ImageSpec {
    pub fn from_registry(registry: &RegistryConfig) -> Self {
        Self {
            local_ref: registry.image_name.clone(),
            registry_path: registry_path(&registry.url, &registry.image_name),
        }
    }

    /// Image name without its tag
    pub fn untagged(&self) -> &str {
        match self.local_ref.find(':') {
            Some(idx) if idx > 0 => &self.local_ref[..idx],
            _ => &self.local_ref,
        }
    }

    /// Finds the reference to clone from in the VM tool's listing
    ///
    /// Candidates are checked in order: the configured name, the name without
    /// its tag, then the registry path. A candidate must equal a whole
    /// whitespace-separated field of the listing, so instances such as
    /// `runner_mac_0` never count as the `runner` image. Returns `None` when
    /// the image is not cached yet.
    pub fn find_in_listing(&self, listing: &str) -> Option<String> {
        let fields: HashSet<&str> = listing.split_whitespace().collect();

        [self.local_ref.as_str(), self.untagged(), self.registry_path.as_str()]
            .into_iter()
            .find(|candidate| !candidate.is_empty() && fields.contains(candidate))
            .map(str::to_string)
    }
}
