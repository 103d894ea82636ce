//! 导航适配：在「走到某点附近」原语之上加危险规避路点、超时与「足够近」判定
//!
//! 每个等待点都与任务的取消 token 竞争，token 被取消时立即返回 Interrupted。

use std::f64::consts::TAU;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::world::{ActionError, Actions, Vec3, WorldView};

/// 近距离直接寻路的超时上限
const DIRECT_TIMEOUT_CAP: Duration = Duration::from_secs(10);
/// 中间路点的到达范围
const WAYPOINT_RANGE: f64 = 2.0;
/// 探索时的到达范围
const EXPLORE_RANGE: f64 = 3.0;
const EXPLORE_ATTEMPTS: usize = 10;

/// 路点落在危险格时依次尝试的横向偏移
const DEFLECTIONS: [(f64, f64, f64); 6] = [
    (2.0, 0.0, 0.0),
    (-2.0, 0.0, 0.0),
    (0.0, 0.0, 2.0),
    (0.0, 0.0, -2.0),
    (2.0, 0.0, 2.0),
    (-2.0, 0.0, -2.0),
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavError {
    #[error("navigation interrupted")]
    Interrupted,

    #[error("navigation timed out {distance:.1} blocks from target")]
    Timeout { distance: f64 },

    #[error("no safe destination found")]
    NoSafeDestination,

    #[error(transparent)]
    Action(#[from] ActionError),
}

/// 在 from 与 to 之间插值 steps-1 个路点；落在危险格的路点按偏移表偏转，全部危险则丢弃
pub fn plan_safe_path(
    from: Vec3,
    to: Vec3,
    steps: usize,
    is_dangerous: impl Fn(Vec3) -> bool,
) -> Vec<Vec3> {
    let steps = steps.max(1);
    let delta = to - from;
    (1..steps)
        .filter_map(|i| {
            let point = from + delta * (i as f64 / steps as f64);
            if !is_dangerous(point) {
                return Some(point);
            }
            DEFLECTIONS
                .iter()
                .map(|&(dx, dy, dz)| point.offset(dx, dy, dz))
                .find(|p| !is_dangerous(*p))
        })
        .collect()
}

/// 某个任务使用的导航器
pub struct Navigator<'a> {
    agent: &'a Agent,
    token: &'a CancellationToken,
}

impl<'a> Navigator<'a> {
    pub fn new(agent: &'a Agent, token: &'a CancellationToken) -> Self {
        Self { agent, token }
    }

    pub fn checkpoint(&self) -> Result<(), NavError> {
        if self.token.is_cancelled() {
            Err(NavError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// 直接寻路；超时后距离 <= range * close_enough_factor 视为成功
    pub async fn go_to(&self, target: Vec3, range: f64, timeout: Duration) -> Result<(), NavError> {
        self.checkpoint()?;
        let client = &self.agent.client;
        let result = tokio::select! {
            _ = self.token.cancelled() => {
                client.stop_moving().await;
                return Err(NavError::Interrupted);
            }
            r = tokio::time::timeout(timeout, client.go_to(target, range)) => r,
        };
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NavError::Action(e)),
            Err(_) => {
                client.stop_moving().await;
                let distance = client.position().distance_to(target);
                if distance <= range * self.agent.config.navigation.close_enough_factor {
                    tracing::debug!(%target, distance, "navigation timed out but close enough");
                    Ok(())
                } else {
                    Err(NavError::Timeout { distance })
                }
            }
        }
    }

    /// 带危险规避的寻路：近距离直达；否则经过最多 max_waypoints 个安全路点后再直达
    pub async fn go_to_safe(
        &self,
        target: Vec3,
        range: f64,
        timeout: Duration,
    ) -> Result<(), NavError> {
        self.checkpoint()?;
        let cfg = &self.agent.config.navigation;
        let start = self.agent.client.position();
        if start.distance_to(target) < cfg.direct_range {
            return self.go_to(target, range, timeout.min(DIRECT_TIMEOUT_CAP)).await;
        }

        let waypoints = {
            let memory = self.agent.memory.read().await;
            plan_safe_path(start, target, cfg.waypoint_steps, |p| memory.is_dangerous(p))
        };
        for waypoint in waypoints.into_iter().take(cfg.max_waypoints) {
            self.checkpoint()?;
            match self
                .go_to(waypoint, WAYPOINT_RANGE, cfg.waypoint_timeout())
                .await
            {
                Err(NavError::Interrupted) => return Err(NavError::Interrupted),
                Err(e) => tracing::debug!(%waypoint, error = %e, "waypoint skipped"),
                Ok(()) => {}
            }
        }
        self.checkpoint()?;
        self.go_to(target, range, timeout).await
    }

    /// 朝 from 的反方向移动 distance
    pub async fn move_away(&self, from: Vec3, distance: f64) -> Result<(), NavError> {
        let me = self.agent.client.position();
        let mut dir = Vec3::new(me.x - from.x, 0.0, me.z - from.z).normalize();
        if dir.length() <= f64::EPSILON {
            dir = Vec3::new(1.0, 0.0, 0.0);
        }
        let target = me + dir * distance;
        self.go_to_safe(target, EXPLORE_RANGE, self.agent.config.navigation.default_timeout())
            .await
    }

    /// 随机探索：随机方向与距离，避开危险格与卡住格，最多尝试 10 次；到达后记为 explore 地点
    pub async fn explore(&self) -> Result<Vec3, NavError> {
        let agent_cfg = &self.agent.config.agent;
        for _ in 0..EXPLORE_ATTEMPTS {
            self.checkpoint()?;
            let me = self.agent.client.position();
            let target = random_destination(
                me,
                agent_cfg.explore_min_distance,
                agent_cfg.explore_max_distance,
            );
            {
                let memory = self.agent.memory.read().await;
                if memory.is_dangerous(target) || memory.is_stuck_cell(target) {
                    continue;
                }
            }
            match self
                .go_to_safe(target, EXPLORE_RANGE, self.agent.config.navigation.default_timeout())
                .await
            {
                Ok(()) => {
                    let ts = chrono::Utc::now().timestamp_millis();
                    self.agent.memory.write().await.save_location(
                        format!("explore_{ts}"),
                        target,
                        "explore",
                    );
                    tracing::info!(%target, "explored");
                    return Ok(target);
                }
                Err(NavError::Interrupted) => return Err(NavError::Interrupted),
                Err(e) => tracing::debug!(%target, error = %e, "explore attempt failed"),
            }
        }
        Err(NavError::NoSafeDestination)
    }
}

fn random_destination(from: Vec3, min: f64, max: f64) -> Vec3 {
    let mut rng = rand::thread_rng();
    let angle = rng.gen_range(0.0..TAU);
    let distance = if max > min { rng.gen_range(min..max) } else { min };
    from.offset(angle.cos() * distance, 0.0, angle.sin() * distance)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::world::{Cell, SimWorld, WorldView};

    #[test]
    fn test_plan_avoids_dangerous_cell() {
        let from = Vec3::new(0.5, 64.0, 0.5);
        let to = Vec3::new(20.5, 64.0, 0.5);
        // 第 5 个插值点 (10.5, 64, 0.5) 落在危险格
        let danger: HashSet<Cell> = [Vec3::new(10.5, 64.0, 0.5).cell()].into();
        let path = plan_safe_path(from, to, 10, |p| danger.contains(&p.cell()));
        assert_eq!(path.len(), 9);
        assert!(path.iter().all(|p| !danger.contains(&p.cell())));
        assert_eq!(path[4], Vec3::new(12.5, 64.0, 0.5));
    }

    #[test]
    fn test_plan_drops_waypoint_when_no_deflection_is_safe() {
        let from = Vec3::new(0.5, 64.0, 0.5);
        let to = Vec3::new(20.5, 64.0, 0.5);
        let center = Vec3::new(10.5, 64.0, 0.5);
        let mut danger: HashSet<Cell> = [center.cell()].into();
        for (dx, dy, dz) in DEFLECTIONS {
            danger.insert(center.offset(dx, dy, dz).cell());
        }
        let path = plan_safe_path(from, to, 10, |p| danger.contains(&p.cell()));
        assert_eq!(path.len(), 8);
        assert!(path.iter().all(|p| !danger.contains(&p.cell())));
    }

    #[tokio::test]
    async fn test_go_to_safe_reaches_target() {
        let world = Arc::new(SimWorld::new());
        let agent = Agent::new(AppConfig::default(), world.clone()).unwrap();
        let token = CancellationToken::new();
        let target = Vec3::new(40.0, 64.0, 0.0);
        agent
            .navigator(&token)
            .go_to_safe(target, 1.0, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(world.position(), target);
    }

    #[tokio::test]
    async fn test_go_to_interrupted_by_token() {
        let world = Arc::new(SimWorld::new());
        world.set_stalled(true);
        let agent = Agent::new(AppConfig::default(), world.clone()).unwrap();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = agent
            .navigator(&token)
            .go_to(Vec3::new(3.0, 64.0, 0.0), 1.0, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, NavError::Interrupted);
    }

    #[tokio::test]
    async fn test_timeout_close_enough_is_success() {
        let world = Arc::new(SimWorld::new().with_position(Vec3::new(2.0, 64.0, 0.0)));
        world.set_stalled(true);
        let agent = Agent::new(AppConfig::default(), world.clone()).unwrap();
        let token = CancellationToken::new();
        let nav = agent.navigator(&token);
        // 距离 2，range 1，factor 3 → 足够近
        nav.go_to(Vec3::new(4.0, 64.0, 0.0), 1.0, Duration::from_millis(20))
            .await
            .unwrap();
        let err = nav
            .go_to(Vec3::new(30.0, 64.0, 0.0), 1.0, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, NavError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_explore_records_location() {
        let world = Arc::new(SimWorld::new());
        let agent = Agent::new(AppConfig::default(), world.clone()).unwrap();
        let token = CancellationToken::new();
        let target = agent.navigator(&token).explore().await.unwrap();
        let distance = Vec3::new(0.0, 64.0, 0.0).distance_to(target);
        assert!((10.0..=30.0).contains(&distance));
        let memory = agent.memory.read().await;
        let (name, loc) = memory.nearest_location(target, Some("explore")).unwrap();
        assert!(name.starts_with("explore_"));
        assert_eq!(loc.position, target);
    }
}
