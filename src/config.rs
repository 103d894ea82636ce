//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AGENT__*` 覆盖（双下划线表示嵌套，如 `AGENT__COMBAT__FLEE_HEALTH=6`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub connection: ConnectionSection,
    pub timing: TimingSection,
    pub combat: CombatSection,
    pub survival: SurvivalSection,
    pub navigation: NavigationSection,
    pub crafting: CraftingSection,
    pub resources: ResourcesSection,
    pub memory: MemorySection,
    pub agent: AgentSection,
}

/// [connection] 段：服务器地址、登录名、断线重连策略
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    pub version: Option<String>,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// 首次重连等待；之后指数退避
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    25565
}

fn default_username() -> String {
    "Agent".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            version: None,
            auto_reconnect: true,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// [timing] 段：各循环周期
#[derive(Debug, Clone, Deserialize)]
pub struct TimingSection {
    #[serde(default = "default_think_interval_ms")]
    pub think_interval_ms: u64,
    #[serde(default = "default_task_interval_ms")]
    pub task_interval_ms: u64,
    #[serde(default = "default_resource_check_ms")]
    pub resource_check_ms: u64,
    #[serde(default = "default_navigation_check_ms")]
    pub navigation_check_ms: u64,
    #[serde(default = "default_memory_update_ms")]
    pub memory_update_ms: u64,
    #[serde(default = "default_decision_interval_ms")]
    pub decision_interval_ms: u64,
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
}

fn default_think_interval_ms() -> u64 {
    500
}

fn default_task_interval_ms() -> u64 {
    500
}

fn default_resource_check_ms() -> u64 {
    3000
}

fn default_navigation_check_ms() -> u64 {
    1000
}

fn default_memory_update_ms() -> u64 {
    5000
}

fn default_decision_interval_ms() -> u64 {
    3000
}

fn default_save_interval_secs() -> u64 {
    60
}

impl TimingSection {
    pub fn think_interval(&self) -> Duration {
        Duration::from_millis(self.think_interval_ms)
    }

    pub fn task_interval(&self) -> Duration {
        Duration::from_millis(self.task_interval_ms)
    }

    pub fn decision_interval(&self) -> Duration {
        Duration::from_millis(self.decision_interval_ms)
    }

    pub fn memory_update_interval(&self) -> Duration {
        Duration::from_millis(self.memory_update_ms)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            think_interval_ms: default_think_interval_ms(),
            task_interval_ms: default_task_interval_ms(),
            resource_check_ms: default_resource_check_ms(),
            navigation_check_ms: default_navigation_check_ms(),
            memory_update_ms: default_memory_update_ms(),
            decision_interval_ms: default_decision_interval_ms(),
            save_interval_secs: default_save_interval_secs(),
        }
    }
}

/// [combat] 段：敌对生物扫描与交战/逃跑阈值
#[derive(Debug, Clone, Deserialize)]
pub struct CombatSection {
    #[serde(default = "default_scan_radius")]
    pub scan_radius: f64,
    #[serde(default = "default_engage_distance")]
    pub engage_distance: f64,
    /// 近于此距离时战斗任务提升为 CRITICAL
    #[serde(default = "default_critical_distance")]
    pub critical_distance: f64,
    /// 近于此距离且血量低时逃跑
    #[serde(default = "default_flee_distance")]
    pub flee_distance: f64,
    /// 攻击距离；更远时先靠近
    #[serde(default = "default_combat_distance")]
    pub combat_distance: f64,
    #[serde(default = "default_flee_health")]
    pub flee_health: f32,
    #[serde(default = "default_hostile_pattern")]
    pub hostile_pattern: String,
}

fn default_scan_radius() -> f64 {
    16.0
}

fn default_engage_distance() -> f64 {
    8.0
}

fn default_critical_distance() -> f64 {
    4.0
}

fn default_flee_distance() -> f64 {
    3.0
}

fn default_combat_distance() -> f64 {
    4.0
}

fn default_flee_health() -> f32 {
    8.0
}

fn default_hostile_pattern() -> String {
    "zombie|skeleton|creeper|spider|enderman|witch|phantom".to_string()
}

impl Default for CombatSection {
    fn default() -> Self {
        Self {
            scan_radius: default_scan_radius(),
            engage_distance: default_engage_distance(),
            critical_distance: default_critical_distance(),
            flee_distance: default_flee_distance(),
            combat_distance: default_combat_distance(),
            flee_health: default_flee_health(),
            hostile_pattern: default_hostile_pattern(),
        }
    }
}

/// [survival] 段：进食阈值与食物分级
#[derive(Debug, Clone, Deserialize)]
pub struct SurvivalSection {
    #[serde(default = "default_eat_at_food")]
    pub eat_at_food: f32,
    #[serde(default = "default_eat_at_health")]
    pub eat_at_health: f32,
    /// 决策层紧急阈值：血量
    #[serde(default = "default_emergency_health")]
    pub emergency_health: f32,
    /// 决策层紧急阈值：饥饿
    #[serde(default = "default_emergency_food")]
    pub emergency_food: f32,
    #[serde(default = "default_food_pattern")]
    pub food_pattern: String,
    /// 回血用的高级食物
    #[serde(default = "default_restorative_pattern")]
    pub restorative_pattern: String,
}

fn default_eat_at_food() -> f32 {
    18.0
}

fn default_eat_at_health() -> f32 {
    15.0
}

fn default_emergency_health() -> f32 {
    10.0
}

fn default_emergency_food() -> f32 {
    6.0
}

fn default_food_pattern() -> String {
    "apple|bread|beef|cooked|porkchop|chicken|mutton|carrot|potato".to_string()
}

fn default_restorative_pattern() -> String {
    "golden_apple|enchanted_golden_apple|steak|cooked_beef".to_string()
}

impl Default for SurvivalSection {
    fn default() -> Self {
        Self {
            eat_at_food: default_eat_at_food(),
            eat_at_health: default_eat_at_health(),
            emergency_health: default_emergency_health(),
            emergency_food: default_emergency_food(),
            food_pattern: default_food_pattern(),
            restorative_pattern: default_restorative_pattern(),
        }
    }
}

/// [navigation] 段：危险方块扫描、路点生成与超时
#[derive(Debug, Clone, Deserialize)]
pub struct NavigationSection {
    #[serde(default = "default_danger_block_distance")]
    pub danger_block_distance: f64,
    /// 近于此距离时直接寻路，不生成路点
    #[serde(default = "default_direct_range")]
    pub direct_range: f64,
    #[serde(default = "default_waypoint_steps")]
    pub waypoint_steps: usize,
    #[serde(default = "default_max_waypoints")]
    pub max_waypoints: usize,
    #[serde(default = "default_nav_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_waypoint_timeout_ms")]
    pub waypoint_timeout_ms: u64,
    /// 超时后距离 <= range * factor 视为到达
    #[serde(default = "default_close_enough_factor")]
    pub close_enough_factor: f64,
    #[serde(default = "default_hazard_pattern")]
    pub hazard_pattern: String,
}

fn default_danger_block_distance() -> f64 {
    3.0
}

fn default_direct_range() -> f64 {
    5.0
}

fn default_waypoint_steps() -> usize {
    10
}

fn default_max_waypoints() -> usize {
    3
}

fn default_nav_timeout_ms() -> u64 {
    20_000
}

fn default_waypoint_timeout_ms() -> u64 {
    8000
}

fn default_close_enough_factor() -> f64 {
    3.0
}

fn default_hazard_pattern() -> String {
    "lava|fire|cactus|magma".to_string()
}

impl NavigationSection {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn waypoint_timeout(&self) -> Duration {
        Duration::from_millis(self.waypoint_timeout_ms)
    }
}

impl Default for NavigationSection {
    fn default() -> Self {
        Self {
            danger_block_distance: default_danger_block_distance(),
            direct_range: default_direct_range(),
            waypoint_steps: default_waypoint_steps(),
            max_waypoints: default_max_waypoints(),
            default_timeout_ms: default_nav_timeout_ms(),
            waypoint_timeout_ms: default_waypoint_timeout_ms(),
            close_enough_factor: default_close_enough_factor(),
            hazard_pattern: default_hazard_pattern(),
        }
    }
}

/// 合成后数量校验模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// 合成调用未报错即成功
    Lenient,
    /// 数量不足时记 warn 日志，仍视为成功
    #[default]
    Warn,
    /// 数量不足视为失败
    Strict,
}

/// [crafting] 段：工作台与合成校验
#[derive(Debug, Clone, Deserialize)]
pub struct CraftingSection {
    #[serde(default = "default_station_item")]
    pub station_item: String,
    #[serde(default = "default_station_search_radius")]
    pub station_search_radius: f64,
    #[serde(default = "default_station_travel_radius")]
    pub station_travel_radius: f64,
    #[serde(default)]
    pub verify: VerifyMode,
}

fn default_station_item() -> String {
    "crafting_table".to_string()
}

fn default_station_search_radius() -> f64 {
    4.0
}

fn default_station_travel_radius() -> f64 {
    32.0
}

impl Default for CraftingSection {
    fn default() -> Self {
        Self {
            station_item: default_station_item(),
            station_search_radius: default_station_search_radius(),
            station_travel_radius: default_station_travel_radius(),
            verify: VerifyMode::default(),
        }
    }
}

/// [resources] 段：资源扫描轮换列表
#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesSection {
    #[serde(default = "default_scan_types")]
    pub scan_types: Vec<String>,
    #[serde(default = "default_resource_radius")]
    pub scan_radius: f64,
}

fn default_scan_types() -> Vec<String> {
    vec![
        "oak_log".into(),
        "stone".into(),
        "cobblestone".into(),
        "iron_ore".into(),
        "coal_ore".into(),
    ]
}

fn default_resource_radius() -> f64 {
    32.0
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            scan_types: default_scan_types(),
            scan_radius: default_resource_radius(),
        }
    }
}

/// [memory] 段：持久化后端（json / sqlite / none）
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_backend")]
    pub backend: String,
    /// json 后端为目录，sqlite 后端为数据库文件
    #[serde(default = "default_memory_path")]
    pub path: PathBuf,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

fn default_backend() -> String {
    "json".to_string()
}

fn default_memory_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_session_id() -> String {
    "default".to_string()
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_memory_path(),
            session_id: default_session_id(),
        }
    }
}

/// [agent] 段：自主模式、进阶模式、空闲探索
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 进阶（roleplay）模式：按发展阶梯推进
    #[serde(default)]
    pub roleplay: bool,
    /// false 时等待 `!start` 命令才开始自主行动
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default = "default_idle_explore_chance")]
    pub idle_explore_chance: f64,
    #[serde(default = "default_explore_min_distance")]
    pub explore_min_distance: f64,
    #[serde(default = "default_explore_max_distance")]
    pub explore_max_distance: f64,
    /// 目标失败多少次后标记为 failed
    #[serde(default = "default_max_goal_attempts")]
    pub max_goal_attempts: u32,
}

fn default_idle_explore_chance() -> f64 {
    0.3
}

fn default_explore_min_distance() -> f64 {
    10.0
}

fn default_explore_max_distance() -> f64 {
    30.0
}

fn default_max_goal_attempts() -> u32 {
    3
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            roleplay: false,
            auto_start: true,
            idle_explore_chance: default_idle_explore_chance(),
            explore_min_distance: default_explore_min_distance(),
            explore_max_distance: default_explore_max_distance(),
            max_goal_attempts: default_max_goal_attempts(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 AGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.timing.think_interval_ms, 500);
        assert_eq!(cfg.combat.flee_health, 8.0);
        assert_eq!(cfg.crafting.verify, VerifyMode::Warn);
        assert_eq!(cfg.resources.scan_types.len(), 5);
        assert!(cfg.agent.auto_start);
    }

    #[test]
    fn test_load_from_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            "[crafting]\nverify = \"strict\"\n\n[agent]\nroleplay = true\nidle_explore_chance = 0.0\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.crafting.verify, VerifyMode::Strict);
        assert!(cfg.agent.roleplay);
        assert_eq!(cfg.agent.idle_explore_chance, 0.0);
        // 未指定的段保持默认
        assert_eq!(cfg.navigation.max_waypoints, 3);
    }
}
