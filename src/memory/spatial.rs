//! 空间记忆：命名地点、资源目击、危险格、路径历史与卡住检测
//!
//! 持久部分（MemoryData）随快照保存；路径历史与卡住集合只在运行期有效，重连时清空。
//! 最近邻查询为线性扫描，集合规模有上限（每种资源 50 条，定期清理过期条目）。

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::world::{Cell, Vec3};

/// 每种资源保留的目击条数
pub const MAX_SIGHTINGS_PER_RESOURCE: usize = 50;
/// 路径历史环形缓冲长度
pub const PATH_HISTORY_LEN: usize = 100;
/// 资源目击去重距离
const RESOURCE_DEDUP_DISTANCE: f64 = 2.0;
/// 最近资源查询的最大距离
const MAX_RESOURCE_DISTANCE: f64 = 128.0;
/// 采样间移动小于此距离视为卡住
const STUCK_DISTANCE: f64 = 0.5;
/// 资源目击过期时间（1 小时）
const RESOURCE_MAX_AGE_MS: i64 = 3_600_000;
/// 命名地点过期时间（24 小时）
const LOCATION_MAX_AGE_MS: i64 = RESOURCE_MAX_AGE_MS * 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedLocation {
    pub position: Vec3,
    pub kind: String,
    /// 毫秒时间戳
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSighting {
    pub position: Vec3,
    pub timestamp: i64,
}

/// 命名区域（中心 + 包围盒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub kind: String,
    pub center: Vec3,
    pub min: Vec3,
    pub max: Vec3,
}

impl Zone {
    pub fn contains(&self, pos: Vec3) -> bool {
        pos.x >= self.min.x
            && pos.x <= self.max.x
            && pos.y >= self.min.y
            && pos.y <= self.max.y
            && pos.z >= self.min.z
            && pos.z <= self.max.z
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub mobs_killed: u64,
    pub items_crafted: u64,
    pub blocks_mined: u64,
}

/// 需要跨进程保存的记忆
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryData {
    pub home: Option<Vec3>,
    pub has_shelter: bool,
    pub known_locations: HashMap<String, NamedLocation>,
    pub resource_locations: HashMap<String, Vec<ResourceSighting>>,
    pub dangerous_areas: HashSet<Cell>,
    pub zones: HashMap<String, Zone>,
    pub stats: Stats,
    pub achieved_goals: Vec<String>,
}

/// 空间记忆（持久数据 + 运行期数据）
#[derive(Debug, Default)]
pub struct SpatialMemory {
    data: MemoryData,
    path_history: VecDeque<Vec3>,
    stuck_cells: HashSet<Cell>,
    dirty: bool,
}

impl SpatialMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: MemoryData) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn data(&self) -> &MemoryData {
        &self.data
    }

    /// 自上次 mark_saved 以来是否有持久数据变更
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    // ---- 命名地点 ----

    /// 保存命名地点；同名覆盖
    pub fn save_location(&mut self, name: impl Into<String>, pos: Vec3, kind: impl Into<String>) {
        self.save_location_at(name, pos, kind, now_ms());
    }

    pub fn save_location_at(
        &mut self,
        name: impl Into<String>,
        pos: Vec3,
        kind: impl Into<String>,
        timestamp: i64,
    ) {
        self.data.known_locations.insert(
            name.into(),
            NamedLocation {
                position: pos,
                kind: kind.into(),
                timestamp,
            },
        );
        self.dirty = true;
    }

    pub fn location(&self, name: &str) -> Option<&NamedLocation> {
        self.data.known_locations.get(name)
    }

    /// 最近的命名地点，可按类型过滤
    pub fn nearest_location(&self, pos: Vec3, kind: Option<&str>) -> Option<(&str, &NamedLocation)> {
        self.data
            .known_locations
            .iter()
            .filter(|(_, loc)| kind.map_or(true, |k| loc.kind == k))
            .min_by(|a, b| {
                pos.distance_to(a.1.position)
                    .total_cmp(&pos.distance_to(b.1.position))
            })
            .map(|(name, loc)| (name.as_str(), loc))
    }

    // ---- 资源 ----

    /// 记录资源目击：2 格内已有记录则忽略；每种最多保留 50 条（淘汰最旧）
    pub fn save_resource(&mut self, block_type: &str, pos: Vec3) -> bool {
        self.save_resource_at(block_type, pos, now_ms())
    }

    pub fn save_resource_at(&mut self, block_type: &str, pos: Vec3, timestamp: i64) -> bool {
        let sightings = self
            .data
            .resource_locations
            .entry(block_type.to_string())
            .or_default();
        if sightings
            .iter()
            .any(|r| r.position.distance_to(pos) < RESOURCE_DEDUP_DISTANCE)
        {
            return false;
        }
        sightings.push(ResourceSighting {
            position: pos,
            timestamp,
        });
        if sightings.len() > MAX_SIGHTINGS_PER_RESOURCE {
            sightings.remove(0);
        }
        self.dirty = true;
        true
    }

    /// 128 格内最近的资源目击
    pub fn nearest_resource(&self, block_type: &str, pos: Vec3) -> Option<&ResourceSighting> {
        self.data
            .resource_locations
            .get(block_type)?
            .iter()
            .filter(|r| pos.distance_to(r.position) < MAX_RESOURCE_DISTANCE)
            .min_by(|a, b| {
                pos.distance_to(a.position)
                    .total_cmp(&pos.distance_to(b.position))
            })
    }

    /// 资源被采完后移除该目击
    pub fn forget_resource(&mut self, block_type: &str, pos: Vec3) {
        if let Some(sightings) = self.data.resource_locations.get_mut(block_type) {
            let before = sightings.len();
            sightings.retain(|r| r.position.distance_to(pos) >= RESOURCE_DEDUP_DISTANCE);
            if sightings.len() != before {
                self.dirty = true;
            }
        }
    }

    pub fn resource_count(&self) -> usize {
        self.data.resource_locations.values().map(Vec::len).sum()
    }

    // ---- 危险格 ----

    pub fn mark_dangerous(&mut self, pos: Vec3) {
        if self.data.dangerous_areas.insert(pos.cell()) {
            self.dirty = true;
        }
    }

    /// 当且仅当 pos 所在格被标记
    pub fn is_dangerous(&self, pos: Vec3) -> bool {
        self.data.dangerous_areas.contains(&pos.cell())
    }

    pub fn danger_count(&self) -> usize {
        self.data.dangerous_areas.len()
    }

    // ---- 路径历史 / 卡住检测 ----

    /// 记录当前位置；与上一采样距离 < 0.5 时把当前格加入卡住集合，返回是否卡住
    pub fn record_position(&mut self, pos: Vec3) -> bool {
        let stuck = self
            .path_history
            .back()
            .is_some_and(|last| last.distance_to(pos) < STUCK_DISTANCE);
        if stuck {
            self.stuck_cells.insert(pos.cell());
        }
        self.path_history.push_back(pos);
        if self.path_history.len() > PATH_HISTORY_LEN {
            self.path_history.pop_front();
        }
        stuck
    }

    pub fn is_stuck_cell(&self, pos: Vec3) -> bool {
        self.stuck_cells.contains(&pos.cell())
    }

    pub fn path_history_len(&self) -> usize {
        self.path_history.len()
    }

    /// 清空运行期数据（重连时调用），持久数据保留
    pub fn reset_transient(&mut self) {
        self.path_history.clear();
        self.stuck_cells.clear();
    }

    // ---- 家 / 庇护所 / 区域 ----

    pub fn set_home(&mut self, pos: Vec3) {
        self.data.home = Some(pos);
        self.dirty = true;
    }

    pub fn home(&self) -> Option<Vec3> {
        self.data.home
    }

    pub fn set_shelter(&mut self, has_shelter: bool) {
        self.data.has_shelter = has_shelter;
        self.dirty = true;
    }

    pub fn has_shelter(&self) -> bool {
        self.data.has_shelter
    }

    pub fn save_zone(&mut self, name: impl Into<String>, center: Vec3, radius: f64, kind: impl Into<String>) {
        self.data.zones.insert(
            name.into(),
            Zone {
                kind: kind.into(),
                center,
                min: center.offset(-radius, -10.0, -radius),
                max: center.offset(radius, 10.0, radius),
            },
        );
        self.dirty = true;
    }

    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.data.zones.get(name)
    }

    // ---- 统计 / 成就 ----

    pub fn stats(&self) -> &Stats {
        &self.data.stats
    }

    pub fn record_mined(&mut self) {
        self.data.stats.blocks_mined += 1;
        self.dirty = true;
    }

    pub fn record_crafted(&mut self, count: u64) {
        self.data.stats.items_crafted += count;
        self.dirty = true;
    }

    pub fn record_kill(&mut self) {
        self.data.stats.mobs_killed += 1;
        self.dirty = true;
    }

    pub fn add_achievement(&mut self, name: &str) {
        if !self.has_achieved(name) {
            self.data.achieved_goals.push(name.to_string());
            self.dirty = true;
        }
    }

    pub fn has_achieved(&self, name: &str) -> bool {
        self.data.achieved_goals.iter().any(|g| g == name)
    }

    // ---- 清理 ----

    /// 清理过期条目：资源 1 小时，命名地点 24 小时；返回移除数量
    pub fn cleanup(&mut self) -> usize {
        self.cleanup_at(now_ms())
    }

    pub fn cleanup_at(&mut self, now: i64) -> usize {
        let mut removed = 0;
        for sightings in self.data.resource_locations.values_mut() {
            let before = sightings.len();
            sightings.retain(|r| now - r.timestamp < RESOURCE_MAX_AGE_MS);
            removed += before - sightings.len();
        }
        self.data.resource_locations.retain(|_, v| !v.is_empty());

        let before = self.data.known_locations.len();
        self.data
            .known_locations
            .retain(|_, loc| now - loc.timestamp <= LOCATION_MAX_AGE_MS);
        removed += before - self.data.known_locations.len();

        if removed > 0 {
            self.dirty = true;
        }
        removed
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_danger_same_cell() {
        let mut mem = SpatialMemory::new();
        mem.mark_dangerous(Vec3::new(10.2, 64.9, -3.1));
        assert!(mem.is_dangerous(Vec3::new(10.8, 64.1, -3.9)));
        assert!(!mem.is_dangerous(Vec3::new(11.0, 64.1, -3.9)));
        assert!(!mem.is_dangerous(Vec3::new(10.5, 64.5, -2.9)));
    }

    #[test]
    fn test_resource_dedup_by_proximity() {
        let mut mem = SpatialMemory::new();
        assert!(mem.save_resource("oak_log", Vec3::new(5.0, 64.0, 5.0)));
        assert!(!mem.save_resource("oak_log", Vec3::new(6.0, 64.0, 5.5)));
        assert!(mem.save_resource("oak_log", Vec3::new(9.0, 64.0, 5.0)));
        assert_eq!(mem.resource_count(), 2);
    }

    #[test]
    fn test_resource_bounded_to_fifty() {
        let mut mem = SpatialMemory::new();
        for i in 0..60 {
            mem.save_resource("stone", Vec3::new(i as f64 * 3.0, 60.0, 0.0));
        }
        assert_eq!(mem.resource_count(), MAX_SIGHTINGS_PER_RESOURCE);
        // 最旧的被淘汰
        assert!(mem.nearest_resource("stone", Vec3::new(0.0, 60.0, 0.0)).unwrap().position.x >= 30.0);
    }

    #[test]
    fn test_nearest_resource_ignores_far_entries() {
        let mut mem = SpatialMemory::new();
        mem.save_resource("iron_ore", Vec3::new(500.0, 20.0, 0.0));
        assert!(mem.nearest_resource("iron_ore", Vec3::default()).is_none());
    }

    #[test]
    fn test_nearest_location_by_kind() {
        let mut mem = SpatialMemory::new();
        mem.save_location("a", Vec3::new(1.0, 0.0, 0.0), "explore");
        mem.save_location("b", Vec3::new(50.0, 0.0, 0.0), "base");
        let (name, _) = mem.nearest_location(Vec3::default(), Some("base")).unwrap();
        assert_eq!(name, "b");
        let (name, _) = mem.nearest_location(Vec3::default(), None).unwrap();
        assert_eq!(name, "a");
    }

    #[test]
    fn test_stuck_detection() {
        let mut mem = SpatialMemory::new();
        assert!(!mem.record_position(Vec3::new(0.0, 64.0, 0.0)));
        assert!(mem.record_position(Vec3::new(0.2, 64.0, 0.1)));
        assert!(mem.is_stuck_cell(Vec3::new(0.9, 64.5, 0.9)));
        assert!(!mem.record_position(Vec3::new(5.0, 64.0, 0.0)));
    }

    #[test]
    fn test_path_history_bounded() {
        let mut mem = SpatialMemory::new();
        for i in 0..150 {
            mem.record_position(Vec3::new(i as f64, 64.0, 0.0));
        }
        assert_eq!(mem.path_history_len(), PATH_HISTORY_LEN);
    }

    #[test]
    fn test_cleanup_evicts_old_entries() {
        let mut mem = SpatialMemory::new();
        let now = 10 * LOCATION_MAX_AGE_MS;
        mem.save_resource_at("coal_ore", Vec3::new(1.0, 0.0, 0.0), now - RESOURCE_MAX_AGE_MS - 1);
        mem.save_resource_at("coal_ore", Vec3::new(9.0, 0.0, 0.0), now - 1000);
        mem.save_location_at("old", Vec3::default(), "explore", now - LOCATION_MAX_AGE_MS - 1);
        mem.save_location_at("recent", Vec3::default(), "explore", now - RESOURCE_MAX_AGE_MS * 2);
        assert_eq!(mem.cleanup_at(now), 2);
        assert_eq!(mem.resource_count(), 1);
        assert!(mem.location("old").is_none());
        assert!(mem.location("recent").is_some());
    }

    #[test]
    fn test_reset_transient_keeps_persistent_data() {
        let mut mem = SpatialMemory::new();
        mem.mark_dangerous(Vec3::new(1.0, 1.0, 1.0));
        mem.record_position(Vec3::default());
        mem.record_position(Vec3::default());
        mem.reset_transient();
        assert_eq!(mem.path_history_len(), 0);
        assert!(!mem.is_stuck_cell(Vec3::default()));
        assert!(mem.is_dangerous(Vec3::new(1.0, 1.0, 1.0)));
    }
}
