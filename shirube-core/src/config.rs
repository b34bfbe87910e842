//! セッション設定

use shirube_ctrl::ExceptionFilters;

/// セッションの動作設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// 実行時に停止せず通過させる例外
    pub exception_filters: ExceptionFilters,
    /// StepInto / StepOver を命令単位で行う
    pub prefer_disassembly: bool,
    /// 選択スレッドだけを動かしてステップする
    pub solo_stepping: bool,
    /// 停止時に停止原因のスレッドを選択する
    pub select_stopped_thread: bool,
    /// 時限エンティティ（保留中のスレッド名など）の寿命フレーム数
    pub death_timer_frames: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exception_filters: ExceptionFilters::empty(),
            prefer_disassembly: false,
            solo_stepping: false,
            select_stopped_thread: true,
            death_timer_frames: 120,
        }
    }
}
