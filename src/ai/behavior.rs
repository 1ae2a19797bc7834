//! Behavior prototypes executed against Active-tier entities (spec §4.6).
//!
//! The eight named modes are parameter sets on one type rather than eight
//! trait implementations — "variants are parameter sets on a single type,
//! not subclasses" per the design note. A host wanting a genuinely custom
//! behavior still implements [`Behavior`] directly; `StandardBehavior`
//! just means the built-ins don't need eight near-identical structs.

use crate::handle::EntityHandle;

/// Per-entity transform slice a behavior reads from and writes into.
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
}

/// What a behavior needs for one tick of `execute_logic`. Borrowed from the
/// per-batch working set; never holds a store lock itself.
pub struct BehaviorContext<'a> {
    pub handle: EntityHandle,
    pub transform: &'a mut Transform,
    pub dt: f32,
    pub player_position: Option<[f32; 2]>,
    pub rng: &'a mut rand::rngs::StdRng,
}

/// Installed under a name via `AiScheduler::register_behavior` and cloned
/// per assigned entity.
pub trait Behavior: Send {
    fn init(&mut self, handle: EntityHandle);
    fn execute_logic(&mut self, ctx: &mut BehaviorContext<'_>);
    fn clean(&mut self, handle: EntityHandle);
    fn on_message(&mut self, handle: EntityHandle, message: &str);
    fn clone_box(&self) -> Box<dyn Behavior>;
    fn name(&self) -> &'static str;
}

/// Per-entity scratch state a [`StandardBehavior`] keeps between ticks
/// (timers, current waypoint, last goal). Kept separate from `Transform` so
/// AI batches can hand it out alongside the transform slice without
/// aliasing the collision-visible fields.
#[derive(Debug, Clone, Default)]
pub struct BehaviorData {
    pub timer: f32,
    pub waypoint_index: u32,
    pub last_goal: Option<[f32; 2]>,
    pub alert: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum StandardKind {
    Idle { sway: bool },
    Wander { radius: f32, pause_sec: f32 },
    Patrol { speed: f32, loop_path: bool },
    Chase { speed: f32, give_up_distance: f32 },
    Flee { speed: f32, safe_distance: f32 },
    Follow { speed: f32, follow_distance: f32 },
    Guard { speed: f32, leash_radius: f32 },
    Attack { speed: f32, range: f32 },
}

impl StandardKind {
    fn name(&self) -> &'static str {
        match self {
            StandardKind::Idle { .. } => "idle",
            StandardKind::Wander { .. } => "wander",
            StandardKind::Patrol { .. } => "patrol",
            StandardKind::Chase { .. } => "chase",
            StandardKind::Flee { .. } => "flee",
            StandardKind::Follow { .. } => "follow",
            StandardKind::Guard { .. } => "guard",
            StandardKind::Attack { .. } => "attack",
        }
    }
}

/// One prototype, cloned per entity at assignment time. Holds its own
/// `BehaviorData` so repeated clones don't share timers.
#[derive(Clone)]
pub struct StandardBehavior {
    kind: StandardKind,
    data: BehaviorData,
    home: Option<[f32; 2]>,
}

impl StandardBehavior {
    pub fn new(kind: StandardKind) -> Self {
        Self {
            kind,
            data: BehaviorData::default(),
            home: None,
        }
    }

    fn step_toward(transform: &mut Transform, target: [f32; 2], speed: f32) {
        let dx = target[0] - transform.position[0];
        let dy = target[1] - transform.position[1];
        let dist = (dx * dx + dy * dy).sqrt();
        if dist < f32::EPSILON {
            transform.velocity = [0.0, 0.0];
            return;
        }
        transform.velocity = [dx / dist * speed, dy / dist * speed];
    }

    fn step_away(transform: &mut Transform, target: [f32; 2], speed: f32) {
        let dx = transform.position[0] - target[0];
        let dy = transform.position[1] - target[1];
        let dist = (dx * dx + dy * dy).sqrt();
        if dist < f32::EPSILON {
            transform.velocity = [speed, 0.0];
            return;
        }
        transform.velocity = [dx / dist * speed, dy / dist * speed];
    }
}

impl Behavior for StandardBehavior {
    fn init(&mut self, _handle: EntityHandle) {
        self.data = BehaviorData::default();
    }

    fn execute_logic(&mut self, ctx: &mut BehaviorContext<'_>) {
        match self.kind {
            StandardKind::Idle { sway } => {
                if sway {
                    self.data.timer += ctx.dt;
                    ctx.transform.velocity = [(self.data.timer * 2.0).sin() * 5.0, 0.0];
                } else {
                    ctx.transform.velocity = [0.0, 0.0];
                }
            }
            StandardKind::Wander { radius, pause_sec } => {
                let home = *self.home.get_or_insert(ctx.transform.position);
                self.data.timer -= ctx.dt;
                if self.data.timer <= 0.0 {
                    use rand::Rng;
                    let angle = ctx.rng.gen_range(0.0..std::f32::consts::TAU);
                    let dist = ctx.rng.gen_range(0.0..radius);
                    self.data.last_goal = Some([home[0] + angle.cos() * dist, home[1] + angle.sin() * dist]);
                    self.data.timer = pause_sec;
                }
                if let Some(goal) = self.data.last_goal {
                    Self::step_toward(ctx.transform, goal, radius.max(1.0) / pause_sec.max(0.1));
                }
            }
            StandardKind::Patrol { speed, loop_path } => {
                let _ = loop_path;
                if let Some(goal) = self.data.last_goal {
                    Self::step_toward(ctx.transform, goal, speed);
                } else {
                    ctx.transform.velocity = [0.0, 0.0];
                }
            }
            StandardKind::Chase { speed, give_up_distance } => {
                if let Some(target) = ctx.player_position {
                    let dx = target[0] - ctx.transform.position[0];
                    let dy = target[1] - ctx.transform.position[1];
                    if (dx * dx + dy * dy).sqrt() <= give_up_distance {
                        Self::step_toward(ctx.transform, target, speed);
                        return;
                    }
                }
                ctx.transform.velocity = [0.0, 0.0];
            }
            StandardKind::Flee { speed, safe_distance } => {
                if let Some(threat) = ctx.player_position {
                    let dx = ctx.transform.position[0] - threat[0];
                    let dy = ctx.transform.position[1] - threat[1];
                    if (dx * dx + dy * dy).sqrt() < safe_distance {
                        Self::step_away(ctx.transform, threat, speed);
                        return;
                    }
                }
                ctx.transform.velocity = [0.0, 0.0];
            }
            StandardKind::Follow { speed, follow_distance } => {
                if let Some(target) = ctx.player_position {
                    let dx = target[0] - ctx.transform.position[0];
                    let dy = target[1] - ctx.transform.position[1];
                    if (dx * dx + dy * dy).sqrt() > follow_distance {
                        Self::step_toward(ctx.transform, target, speed);
                        return;
                    }
                }
                ctx.transform.velocity = [0.0, 0.0];
            }
            StandardKind::Guard { speed, leash_radius } => {
                let home = *self.home.get_or_insert(ctx.transform.position);
                if self.data.alert {
                    if let Some(target) = ctx.player_position {
                        Self::step_toward(ctx.transform, target, speed);
                        return;
                    }
                }
                let dx = ctx.transform.position[0] - home[0];
                let dy = ctx.transform.position[1] - home[1];
                if (dx * dx + dy * dy).sqrt() > leash_radius {
                    Self::step_toward(ctx.transform, home, speed);
                } else {
                    ctx.transform.velocity = [0.0, 0.0];
                }
            }
            StandardKind::Attack { speed, range } => {
                if let Some(target) = ctx.player_position {
                    let dx = target[0] - ctx.transform.position[0];
                    let dy = target[1] - ctx.transform.position[1];
                    let dist = (dx * dx + dy * dy).sqrt();
                    if dist > range {
                        Self::step_toward(ctx.transform, target, speed);
                    } else {
                        ctx.transform.velocity = [0.0, 0.0];
                    }
                }
            }
        }
    }

    fn clean(&mut self, _handle: EntityHandle) {
        self.data = BehaviorData::default();
        self.home = None;
    }

    fn on_message(&mut self, _handle: EntityHandle, message: &str) {
        match message {
            "raise_alert" => self.data.alert = true,
            "panic" => self.data.alert = false,
            "idle_sway" => {
                if let StandardKind::Idle { sway } = &mut self.kind {
                    *sway = true;
                }
            }
            _ => {}
        }
    }

    fn clone_box(&self) -> Box<dyn Behavior> {
        Box::new(self.clone())
    }

    fn name(&self) -> &'static str {
        self.kind.name()
    }
}
