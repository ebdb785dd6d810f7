use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_url: String,
    pub storage_path: String,
    pub media_path: String,
    pub demo_video_path: String,
    pub request_timeout: Duration,
    pub video_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        let host = "127.0.0.1";
        let port = "8000";
        let storage_path = env::var("MATHLEARN_STORAGE_PATH").unwrap_or("./".to_string());
        let api_url =
            env::var("MATHLEARN_API_URL").unwrap_or(format!("http://{}:{}", host, port));
        let media_path = PathBuf::from(&storage_path)
            .join("media")
            .display()
            .to_string();
        let demo_video_path = env::var("MATHLEARN_DEMO_VIDEO_PATH").unwrap_or_else(|_| {
            PathBuf::from(&storage_path)
                .join("assets")
                .join("demo-math-video.mp4")
                .display()
                .to_string()
        });
        let request_timeout = secs_from_env("MATHLEARN_REQUEST_TIMEOUT_SECS", 60);
        // Video generation renders a full animation on the backend
        let video_timeout = secs_from_env("MATHLEARN_VIDEO_TIMEOUT_SECS", 60 * 10);

        Self {
            api_url,
            storage_path,
            media_path,
            demo_video_path,
            request_timeout,
            video_timeout,
        }
    }
}

impl AppConfig {
    /// Override the backend base URL, e.g. from a CLI flag.
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }
}

fn secs_from_env(key: &str, default: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}
