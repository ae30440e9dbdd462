//! Agent configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the edge agent.
///
/// All fields have defaults suitable for a development deployment;
/// production overrides come from the environment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Bind address for the perception event listener.
    pub listen_addr: String,
    /// User id written into every blob key and metadata row.
    pub user_id: String,
    /// Bucket for annotated (bbox-drawn) frames.
    pub frames_with_bbox_bucket: String,
    /// Bucket for raw frames.
    pub frames_without_bbox_bucket: String,
    /// Bucket for cropped impurity images.
    pub impurities_bucket: String,
    /// Jobs table name.
    pub jobs_table: String,
    /// Frame detections table name.
    pub frames_table: String,
    /// Impurity metadata table name.
    pub impurities_table: String,
    /// Local cache directory for downloaded model artifacts.
    pub model_cache_dir: PathBuf,
    /// Interval between flush ticks.
    pub flush_interval: Duration,
    /// Grouping-window tolerance in milliseconds.
    pub group_window_ms: i64,
    /// Interval between job table polls.
    pub poll_interval: Duration,
    /// Model tag written into frame records.
    pub model_tag: String,
    /// Launch command template for the camera service;
    /// `{model_path}` is substituted at start time.
    pub camera_launch_cmd: String,
    /// Launch command for the sorting-machine bridge service.
    pub sdm_launch_cmd: String,
}

const DEFAULT_CAMERA_LAUNCH_CMD: &str = "ros2 launch camera_bringup detection_bringup.launch.py \
     yolo_model:={model_path} confidence_threshold:=0.35 use_fp16:=true";
const DEFAULT_SDM_LAUNCH_CMD: &str = "ros2 launch sdm_bridge_ros2 sdm.launch.py";

impl AgentConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                        |
    /// |------------------------------|--------------------------------|
    /// | `PERCEPTION_LISTEN_ADDR`     | `127.0.0.1:7878`               |
    /// | `SORTER_USER_ID`             | `web-user`                     |
    /// | `FRAMES_WITH_BBOX_BUCKET`    | `sorter-frames-with-bbox`      |
    /// | `FRAMES_WITHOUT_BBOX_BUCKET` | `sorter-frames-without-bbox`   |
    /// | `IMPURITIES_BUCKET`          | `sorter-impurities`            |
    /// | `JOBS_TABLE`                 | `LaunchJobs`                   |
    /// | `FRAMES_TABLE`               | `FrameDetections`              |
    /// | `IMPURITIES_TABLE`           | `ImpurityData`                 |
    /// | `MODEL_CACHE_DIR`            | `$HOME/.sorter/models`         |
    /// | `FLUSH_INTERVAL_SECS`        | `2`                            |
    /// | `GROUP_WINDOW_MS`            | `100`                          |
    /// | `JOB_POLL_INTERVAL_SECS`     | `5`                            |
    /// | `MODEL_TAG`                  | `yolov8-best`                  |
    /// | `CAMERA_LAUNCH_CMD`          | ros2 camera bringup launch     |
    /// | `SDM_LAUNCH_CMD`             | ros2 sdm bridge launch         |
    pub fn from_env() -> Self {
        let listen_addr =
            std::env::var("PERCEPTION_LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:7878".into());

        let user_id = std::env::var("SORTER_USER_ID").unwrap_or_else(|_| "web-user".into());

        let frames_with_bbox_bucket = std::env::var("FRAMES_WITH_BBOX_BUCKET")
            .unwrap_or_else(|_| "sorter-frames-with-bbox".into());
        let frames_without_bbox_bucket = std::env::var("FRAMES_WITHOUT_BBOX_BUCKET")
            .unwrap_or_else(|_| "sorter-frames-without-bbox".into());
        let impurities_bucket =
            std::env::var("IMPURITIES_BUCKET").unwrap_or_else(|_| "sorter-impurities".into());

        let jobs_table = std::env::var("JOBS_TABLE").unwrap_or_else(|_| "LaunchJobs".into());
        let frames_table =
            std::env::var("FRAMES_TABLE").unwrap_or_else(|_| "FrameDetections".into());
        let impurities_table =
            std::env::var("IMPURITIES_TABLE").unwrap_or_else(|_| "ImpurityData".into());

        let model_cache_dir = std::env::var("MODEL_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_model_cache_dir());

        let flush_interval_secs: u64 = std::env::var("FLUSH_INTERVAL_SECS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("FLUSH_INTERVAL_SECS must be a valid u64");

        let group_window_ms: i64 = std::env::var("GROUP_WINDOW_MS")
            .unwrap_or_else(|_| "100".into())
            .parse()
            .expect("GROUP_WINDOW_MS must be a valid i64");

        let poll_interval_secs: u64 = std::env::var("JOB_POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("JOB_POLL_INTERVAL_SECS must be a valid u64");

        let model_tag = std::env::var("MODEL_TAG").unwrap_or_else(|_| "yolov8-best".into());

        let camera_launch_cmd = std::env::var("CAMERA_LAUNCH_CMD")
            .unwrap_or_else(|_| DEFAULT_CAMERA_LAUNCH_CMD.into());
        let sdm_launch_cmd =
            std::env::var("SDM_LAUNCH_CMD").unwrap_or_else(|_| DEFAULT_SDM_LAUNCH_CMD.into());

        Self {
            listen_addr,
            user_id,
            frames_with_bbox_bucket,
            frames_without_bbox_bucket,
            impurities_bucket,
            jobs_table,
            frames_table,
            impurities_table,
            model_cache_dir,
            flush_interval: Duration::from_secs(flush_interval_secs),
            group_window_ms,
            poll_interval: Duration::from_secs(poll_interval_secs),
            model_tag,
            camera_launch_cmd,
            sdm_launch_cmd,
        }
    }
}

fn default_model_cache_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".sorter").join("models"),
        Err(_) => PathBuf::from(".sorter-models"),
    }
}
