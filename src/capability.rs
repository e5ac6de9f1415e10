//! Capability registry: runtime probes of optional uploader
//! features, so C3/C4 can branch without knowing the concrete driver
//! type, following the pattern of checking a boxed
//! `SftpLike` trait object rather than matching on a driver enum.

use crate::uploader::Uploader;

/// `hasBulkUpload(u)`.
pub fn has_bulk_upload(u: &mut dyn Uploader) -> bool {
    u.as_bulk_upload().is_some()
}

/// `hasDiff(u)`.
pub fn has_diff(u: &mut dyn Uploader) -> bool {
    u.as_diff_capable().is_some()
}

/// `hasListRemoteFiles(u)`. Drivers that answer true here are the only
/// ones mirror mode may be used with.
pub fn has_list_remote_files(u: &mut dyn Uploader) -> bool {
    u.as_lister().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::local::LocalUploader;
    use crate::uploader::scp::ScpUploader;

    #[test]
    fn local_driver_advertises_listing_but_not_bulk_or_diff() {
        let dir = tempfile::tempdir().unwrap();
        let mut local = LocalUploader::new(dir.path().to_path_buf(), false);
        assert!(!has_bulk_upload(&mut local));
        assert!(!has_diff(&mut local));
        assert!(has_list_remote_files(&mut local));
    }

    #[test]
    fn scp_driver_has_no_optional_capabilities() {
        let opts = crate::uploader::ssh_opts::SshOptions {
            host: "example.com".into(),
            port: 22,
            user: None,
            key_file: None,
            password: None,
            connect_timeout_secs: 10,
            legacy_mode: false,
        };
        let mut scp = ScpUploader::new(opts, "/dest".into());
        assert!(!has_bulk_upload(&mut scp));
        assert!(!has_diff(&mut scp));
        assert!(!has_list_remote_files(&mut scp));
    }
}
