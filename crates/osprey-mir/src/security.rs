//! Compile-time gate for side-effecting builtins and foreign calls.

use osprey_infer::builtins::Permission;

use crate::CodegenError;

/// Which builtin families a compilation may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityConfig {
    pub allow_http: bool,
    pub allow_websocket: bool,
    pub allow_file_read: bool,
    pub allow_file_write: bool,
    pub allow_ffi: bool,
    pub allow_process_execution: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_http: true,
            allow_websocket: true,
            allow_file_read: true,
            allow_file_write: true,
            allow_ffi: true,
            allow_process_execution: true,
        }
    }
}

impl SecurityConfig {
    /// Everything with an outside-world effect disabled.
    pub fn sandbox() -> Self {
        Self {
            allow_http: false,
            allow_websocket: false,
            allow_file_read: false,
            allow_file_write: false,
            allow_ffi: false,
            allow_process_execution: false,
        }
    }

    pub fn permits(&self, permission: Permission) -> bool {
        match permission {
            Permission::None => true,
            Permission::Http => self.allow_http,
            Permission::WebSocket => self.allow_websocket,
            Permission::FileRead => self.allow_file_read,
            Permission::FileWrite => self.allow_file_write,
            Permission::Process => self.allow_process_execution,
            Permission::Ffi => self.allow_ffi,
        }
    }

    pub fn check(&self, function: &str, permission: Permission) -> Result<(), CodegenError> {
        if self.permits(permission) {
            return Ok(());
        }
        tracing::debug!(function, permission = permission.as_str(), "call blocked");
        Err(CodegenError::UnsupportedCall {
            function: function.to_string(),
            permission: permission.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_everything() {
        let config = SecurityConfig::default();
        assert!(config.check("httpGet", Permission::Http).is_ok());
        assert!(config.check("native", Permission::Ffi).is_ok());
    }

    #[test]
    fn sandbox_blocks_outside_effects_but_not_core() {
        let config = SecurityConfig::sandbox();
        assert!(config.check("print", Permission::None).is_ok());
        let err = config
            .check("readFile", Permission::FileRead)
            .expect_err("blocked");
        insta::assert_snapshot!(
            err.to_string(),
            @"call to `readFile` is not allowed: file-read access is disabled"
        );
    }

    #[test]
    fn single_family_can_be_disabled() {
        let config = SecurityConfig {
            allow_websocket: false,
            ..SecurityConfig::default()
        };
        assert!(config.permits(Permission::Http));
        assert!(!config.permits(Permission::WebSocket));
    }
}
