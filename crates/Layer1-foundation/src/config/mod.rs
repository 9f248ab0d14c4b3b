//! Config - 플러그인 호스트 설정
//!
//! - `plugins.rs` - PluginSystemConfig (JSON 파일 + 환경 변수)
//! - `env.rs` - 환경 변수 소스 추상화

mod env;
mod plugins;

pub use env::{env_segment, is_truthy, EnvSource, MapEnv, ProcessEnv};
pub use plugins::{
    expand_home, PluginSystemConfig, ENV_ALLOWED_DIRS, ENV_CLEANUP_TIMEOUT, ENV_INIT_TIMEOUT,
    ENV_PLUGIN_DIRS, PLUGINS_CONFIG_FILE,
};
