//! Voxel Agent - 方块世界自主智能体
//!
//! 模块划分：
//! - **agent**: Agent 聚合根（配置、客户端句柄、任务队列、空间记忆、目标）
//! - **chat**: 聊天命令解析与分派
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 任务队列、执行器、错误与恢复、关闭、主控循环
//! - **crafting**: 递归合成解析（带环检测）
//! - **decision**: 决策引擎、目标管理、进阶模式
//! - **handlers**: 各类任务的处理器
//! - **memory**: 空间记忆与快照持久化
//! - **navigation**: 危险规避的路点导航
//! - **think**: 反射层（战斗 / 生存 / 资源 / 导航检查）
//! - **world**: 游戏世界边界 trait 与进程内模拟世界

pub mod agent;
pub mod chat;
pub mod config;
pub mod core;
pub mod crafting;
pub mod decision;
pub mod handlers;
pub mod memory;
pub mod navigation;
pub mod observability;
pub mod think;
pub mod world;

pub use agent::Agent;
pub use config::{load_config, AppConfig};
