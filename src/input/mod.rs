/// 视频输入系统 (Video Input System)
///
/// 采集线程通过 `VideoSource` 拉取帧:
/// - TestPatternSource: 测试画面 (无摄像头时的回退源)
/// - IpCameraSource:    HTTP IP摄像头 JPEG 快照 (DroidCam / IP Webcam)
/// - InputSource:       命令行输入源解析 (索引 / URL / 预设名)
pub mod ip_camera;
pub mod source;
pub mod test_pattern;

pub use ip_camera::IpCameraSource;
pub use source::{open_source, InputSource, VideoSource};
pub use test_pattern::TestPatternSource;
