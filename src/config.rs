use std::time::Duration;

#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Clone, Debug)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum)]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "3000")]
    pub port: u16,

    // absolute base that rewritten playlists point back to, like https://proxy.example.com/
    // when this is unset the request path is used so players resolve it against the playlist
    #[clap(long, env)]
    pub public_url: Option<String>,

    // upstream auth endpoint, sessions are posted here
    #[clap(long, env)]
    pub auth_url: String,

    // the media origin, segments living here get their domain dropped from the pointer
    #[clap(long, env)]
    pub origin_url: String,

    // channel catalog api, answers action=get_channels and action=get_play_info
    #[clap(long, env)]
    pub catalog_url: String,

    #[clap(long, env, default_value = "")]
    pub catalog_api_key: String,

    // shared secret the upstream uses to check our signatures
    #[clap(long, env)]
    pub signing_secret: String,

    // device id the upstream knows us by, goes into every signature
    #[clap(long, env)]
    pub client_identity: String,

    #[clap(long, env, default_value = "")]
    pub app_id: String,

    #[clap(long, env, default_value = "")]
    pub hardware: String,

    #[clap(long, env, default_value = "")]
    pub client_version: String,

    // grants, play info and the channel list all share this
    #[clap(long, env, default_value = "300")]
    pub cache_ttl_seconds: u64,

    // keep this under the real upstream token lifetime so we refresh early
    #[clap(long, env, default_value = "850")]
    pub session_window_seconds: u64,

    #[clap(long, env, default_value = "150")]
    pub signature_window_seconds: u64,

    #[clap(long, env, default_value = "12")]
    pub playlist_timeout_seconds: u64,

    #[clap(long, env, default_value = "15")]
    pub segment_timeout_seconds: u64,

    // origin fetches, players like ffmpeg's ua so pretend to be one
    #[clap(long, env, default_value = "Lavf/58.12.100")]
    pub user_agent: String,

    #[clap(long, env, default_value = "okhttp/3.12.5")]
    pub auth_user_agent: String,

    // where players get sent when the origin hands back something that isn't a playlist
    #[clap(long, env, default_value = "http://vjs.zencdn.net/v/oceans.mp4")]
    pub fallback_url: String,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl AppConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn session_window(&self) -> Duration {
        Duration::from_secs(self.session_window_seconds)
    }

    pub fn playlist_timeout(&self) -> Duration {
        Duration::from_secs(self.playlist_timeout_seconds)
    }

    pub fn segment_timeout(&self) -> Duration {
        Duration::from_secs(self.segment_timeout_seconds)
    }
}

impl Default for AppConfig {
    // mostly here for tests, nothing here points anywhere real
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 3000,
            public_url: None,
            auth_url: "http://127.0.0.1:9000/api.php".to_string(),
            origin_url: "http://127.0.0.1:9000".to_string(),
            catalog_url: "http://127.0.0.1:9000/catalog.php".to_string(),
            catalog_api_key: String::new(),
            signing_secret: "default-signing-secret".to_string(),
            client_identity: "default-client".to_string(),
            app_id: String::new(),
            hardware: String::new(),
            client_version: String::new(),
            cache_ttl_seconds: 300,
            session_window_seconds: 850,
            signature_window_seconds: 150,
            playlist_timeout_seconds: 12,
            segment_timeout_seconds: 15,
            user_agent: "Lavf/58.12.100".to_string(),
            auth_user_agent: "okhttp/3.12.5".to_string(),
            fallback_url: "http://vjs.zencdn.net/v/oceans.mp4".to_string(),
            sentry_dsn: None,
        }
    }
}
