//! Locate the firmware patch for a chip.

use std::fs;
use std::path::PathBuf;

use log::{debug, error};

use crate::hci::config::FW_PATCHFILE_PATH_MAXLEN;
use crate::hci::{VendorError, VendorResult};

/// Search settings for patch files.
#[derive(Debug, Clone)]
pub struct PatchLocator {
    dir: String,
    file_name: Option<String>,
    extension: &'static str,
    max_path_len: usize,
}

impl PatchLocator {
    pub fn new(dir: impl Into<String>, file_name: Option<String>, extension: &'static str) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.filter(|n| !n.is_empty()),
            extension,
            max_path_len: FW_PATCHFILE_PATH_MAXLEN,
        }
    }

    pub fn with_max_path_len(mut self, max_path_len: usize) -> Self {
        self.max_path_len = max_path_len;
        self
    }

    /// Find the patch for `chip_id`.
    ///
    /// A configured file name wins outright and is not checked against the
    /// chip id or the file system. Otherwise the first directory entry whose
    /// name starts with `chip_id` and ends with the patch extension (both
    /// case-insensitive) is used; a match whose path is too long ends the
    /// search with an error. Directory order is whatever the file system
    /// returns.
    pub fn find(&self, chip_id: &str) -> VendorResult<PathBuf> {
        debug!("patch: target name [{}]", chip_id);

        if let Some(name) = &self.file_name {
            let path = self.join(name);
            debug!("patch: configured file {}", path);
            return Ok(PathBuf::from(path));
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            debug!("patch: cannot open {}: {}", self.dir, e);
            VendorError::PatchNotFound {
                id: chip_id.to_string(),
            }
        })?;

        let names = entries
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok());
        self.first_match(names, chip_id)
    }

    /// The first matching name decides the outcome, even when its path
    /// is too long.
    fn first_match(
        &self,
        names: impl IntoIterator<Item = String>,
        chip_id: &str,
    ) -> VendorResult<PathBuf> {
        let Some(name) = names
            .into_iter()
            .find(|name| matches_patch(name, chip_id, self.extension))
        else {
            return Err(VendorError::PatchNotFound {
                id: chip_id.to_string(),
            });
        };

        let len = name.len() + self.dir.len();
        if len > self.max_path_len {
            error!("patch: invalid patch file name {} (too long)", name);
            return Err(VendorError::PatchPathTooLong {
                len,
                max: self.max_path_len,
            });
        }

        let path = self.join(&name);
        debug!("patch: found {}", path);
        Ok(PathBuf::from(path))
    }

    fn join(&self, name: &str) -> String {
        let mut path = self.dir.clone();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(name);
        path
    }
}

fn matches_patch(name: &str, chip_id: &str, extension: &str) -> bool {
    let name = name.as_bytes();
    let id = chip_id.as_bytes();
    let ext = extension.as_bytes();

    name.len() >= id.len()
        && name[..id.len()].eq_ignore_ascii_case(id)
        && name.len() >= ext.len()
        && name[name.len() - ext.len()..].eq_ignore_ascii_case(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::config::{PATCH_EXT_BINARY, PATCH_EXT_TEXT};
    use crate::test_helpers::TestContext;

    fn dir_string(ctx: &TestContext) -> String {
        ctx.root().to_string_lossy().into_owned()
    }

    #[test]
    fn test_prefers_matching_extension() {
        let ctx = TestContext::new();
        ctx.touch("BCM43241A0.pbn");
        ctx.touch("BCM43241A0.txt");
        ctx.touch("OTHER.pbn");

        let locator = PatchLocator::new(dir_string(&ctx), None, PATCH_EXT_BINARY);
        let found = locator.find("BCM43241A0").unwrap();
        assert_eq!(found, ctx.path("BCM43241A0.pbn"));
    }

    #[test]
    fn test_configured_name_is_used_verbatim() {
        let ctx = TestContext::new();
        ctx.touch("a00.pbn");

        let locator = PatchLocator::new("/fw/", Some("custom.pbn".into()), PATCH_EXT_BINARY);
        assert_eq!(locator.find("a00").unwrap(), PathBuf::from("/fw/custom.pbn"));

        let locator = PatchLocator::new("/fw", Some("custom.pbn".into()), PATCH_EXT_BINARY);
        assert_eq!(locator.find("a00").unwrap(), PathBuf::from("/fw/custom.pbn"));
    }

    #[test]
    fn test_empty_configured_name_falls_back_to_search() {
        let ctx = TestContext::new();
        ctx.touch("a00.pbn");

        let locator = PatchLocator::new(dir_string(&ctx), Some(String::new()), PATCH_EXT_BINARY);
        assert_eq!(locator.find("a00").unwrap(), ctx.path("a00.pbn"));
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let ctx = TestContext::new();
        ctx.touch("A00_B0.PBN");

        let locator = PatchLocator::new(dir_string(&ctx), None, PATCH_EXT_BINARY);
        assert_eq!(locator.find("a00").unwrap(), ctx.path("A00_B0.PBN"));
    }

    #[test]
    fn test_text_extension() {
        let ctx = TestContext::new();
        ctx.touch("370710018002030d00.pbn");
        ctx.touch("370710018002030d00.seq");

        let locator = PatchLocator::new(dir_string(&ctx), None, PATCH_EXT_TEXT);
        assert_eq!(
            locator.find("370710018002030d00").unwrap(),
            ctx.path("370710018002030d00.seq")
        );
    }

    #[test]
    fn test_no_match_is_not_found() {
        let ctx = TestContext::new();
        ctx.touch("b00.pbn");

        let locator = PatchLocator::new(dir_string(&ctx), None, PATCH_EXT_BINARY);
        assert!(matches!(
            locator.find("a00"),
            Err(VendorError::PatchNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let ctx = TestContext::new();
        let locator = PatchLocator::new(
            ctx.path("missing").to_string_lossy().into_owned(),
            None,
            PATCH_EXT_BINARY,
        );
        assert!(matches!(
            locator.find("a00"),
            Err(VendorError::PatchNotFound { .. })
        ));
    }

    #[test]
    fn test_too_long_path_is_rejected() {
        let ctx = TestContext::new();
        ctx.touch("a00_with_a_rather_long_suffix.pbn");

        let dir = dir_string(&ctx);
        let locator =
            PatchLocator::new(dir.clone(), None, PATCH_EXT_BINARY).with_max_path_len(dir.len() + 8);
        assert!(matches!(
            locator.find("a00"),
            Err(VendorError::PatchPathTooLong { .. })
        ));
    }

    #[test]
    fn test_scan_stops_at_first_match() {
        let locator = PatchLocator::new("/fw", None, PATCH_EXT_BINARY).with_max_path_len(12);
        let names = ["b00.pbn", "a00_long_suffix.pbn", "a00.pbn"].map(String::from);

        assert!(matches!(
            locator.first_match(names.clone(), "a00"),
            Err(VendorError::PatchPathTooLong { len: 22, max: 12 })
        ));
        assert_eq!(
            locator.first_match(names[1..].iter().rev().cloned(), "a00").unwrap(),
            PathBuf::from("/fw/a00.pbn")
        );
    }

    #[test]
    fn test_extension_shorter_than_id_prefix() {
        assert!(matches_patch("a00.pbn", "a00", ".pbn"));
        assert!(!matches_patch("a0", "a00", ".pbn"));
        assert!(!matches_patch("a00.pb", "a00", ".pbn"));
    }
}
