//! Contact phases, schedules and transition predicates

use serde::{Deserialize, Serialize};

use crate::dynamics::{contact_reactions, ContactSide, RobotModel};
use crate::error::{DynamicsError, Result};
use crate::graph::{Key, Values};

/// Contact phase; selects which contact joints are active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Ground = 0,
    LeftOnGround = 1,
    RightOnGround = 2,
    Air = 3,
}

impl Phase {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        match i {
            0 => Some(Phase::Ground),
            1 => Some(Phase::LeftOnGround),
            2 => Some(Phase::RightOnGround),
            3 => Some(Phase::Air),
            _ => None,
        }
    }

    /// Whether the foot on `side` is down
    pub fn in_contact(self, side: ContactSide) -> bool {
        match (self, side) {
            (Phase::Ground, _) => true,
            (Phase::LeftOnGround, ContactSide::Left) => true,
            (Phase::RightOnGround, ContactSide::Right) => true,
            _ => false,
        }
    }

    /// Phase with the given feet on the ground
    pub fn from_contacts(left: bool, right: bool) -> Self {
        match (left, right) {
            (true, true) => Phase::Ground,
            (true, false) => Phase::LeftOnGround,
            (false, true) => Phase::RightOnGround,
            (false, false) => Phase::Air,
        }
    }
}

/// Maximal run of equal phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub phase: Phase,
    /// First step of the segment
    pub start: usize,
    /// Number of steps
    pub len: usize,
}

impl Segment {
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn contains(&self, k: usize) -> bool {
        k >= self.start && k < self.end()
    }
}

/// Validated sequence of phase segments covering steps `0..K`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSchedule {
    segments: Vec<Segment>,
    num_steps: usize,
}

impl PhaseSchedule {
    pub fn from_step_phases(step_phases: &[Phase]) -> Result<Self> {
        if step_phases.is_empty() {
            return Err(DynamicsError::InvalidSchedule("no steps".to_string()));
        }
        let mut segments: Vec<Segment> = Vec::new();
        for (k, &phase) in step_phases.iter().enumerate() {
            match segments.last_mut() {
                Some(seg) if seg.phase == phase => seg.len += 1,
                _ => segments.push(Segment { phase, start: k, len: 1 }),
            }
        }
        Self::from_segments(segments)
    }

    /// Build from `(phase, steps)` pairs
    pub fn from_budget(budget: &[(Phase, usize)]) -> Result<Self> {
        let mut segments = Vec::new();
        let mut start = 0;
        for &(phase, len) in budget {
            segments.push(Segment { phase, start, len });
            start += len;
        }
        Self::from_segments(segments)
    }

    fn from_segments(segments: Vec<Segment>) -> Result<Self> {
        if segments.is_empty() {
            return Err(DynamicsError::InvalidSchedule("no segments".to_string()));
        }
        let mut next = 0;
        for (i, seg) in segments.iter().enumerate() {
            if seg.len == 0 {
                return Err(DynamicsError::InvalidSchedule(format!("segment {i} is empty")));
            }
            if seg.start != next {
                return Err(DynamicsError::InvalidSchedule(format!(
                    "segment {i} starts at {} instead of {next}",
                    seg.start
                )));
            }
            if i > 0 && segments[i - 1].phase == seg.phase {
                return Err(DynamicsError::InvalidSchedule(format!("segments {} and {i} share a phase", i - 1)));
            }
            next = seg.end();
        }
        Ok(Self { segments, num_steps: next })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Ordinal of the segment containing step `k`
    pub fn segment_of(&self, k: usize) -> Option<usize> {
        self.segments.iter().position(|s| s.contains(k))
    }

    pub fn phase_at(&self, k: usize) -> Option<Phase> {
        self.segment_of(k).map(|s| self.segments[s].phase)
    }

    pub fn step_phases(&self) -> Vec<Phase> {
        self.segments.iter().flat_map(|s| std::iter::repeat(s.phase).take(s.len)).collect()
    }
}

/// Outcome of a transition predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stay,
    Switch(Phase),
    Stop,
}

/// Decides the phase of step k+1 after step k has been simulated
///
/// `values` holds the full solution of step k (including wrenches and the
/// base twist).
pub trait PhaseTransition {
    fn next(&mut self, robot: &RobotModel, k: usize, phase: Phase, values: &Values) -> Result<Transition>;
}

/// Feet with a negative vertical reaction leave the ground
#[derive(Debug, Clone, Copy, Default)]
pub struct Liftoff;

impl PhaseTransition for Liftoff {
    fn next(&mut self, robot: &RobotModel, k: usize, phase: Phase, values: &Values) -> Result<Transition> {
        let mut left = phase.in_contact(ContactSide::Left);
        let mut right = phase.in_contact(ContactSide::Right);
        for (j, reaction) in contact_reactions(robot, phase, k, values)? {
            if reaction < 0.0 {
                match robot.joint(j).contact {
                    Some(ContactSide::Left) => left = false,
                    Some(ContactSide::Right) => right = false,
                    None => {}
                }
            }
        }
        let next = Phase::from_contacts(left, right);
        Ok(if next == phase { Transition::Stay } else { Transition::Switch(next) })
    }
}

/// Stop at the top of the flight
#[derive(Debug, Clone, Copy, Default)]
pub struct Apex;

impl PhaseTransition for Apex {
    fn next(&mut self, robot: &RobotModel, k: usize, phase: Phase, values: &Values) -> Result<Transition> {
        if phase != Phase::Air {
            return Ok(Transition::Stay);
        }
        let vz = values.vector3(Key::twist(robot.base, k))?.z;
        Ok(if vz <= 0.0 { Transition::Stop } else { Transition::Stay })
    }
}

/// Lift off, then stop at the apex
#[derive(Debug, Clone, Copy, Default)]
pub struct VerticalJump;

impl PhaseTransition for VerticalJump {
    fn next(&mut self, robot: &RobotModel, k: usize, phase: Phase, values: &Values) -> Result<Transition> {
        if phase == Phase::Air {
            Apex.next(robot, k, phase, values)
        } else {
            Liftoff.next(robot, k, phase, values)
        }
    }
}

/// Follow a fixed list of `(phase, steps)`
#[derive(Debug, Clone)]
pub struct StepBudget {
    schedule: PhaseSchedule,
}

impl StepBudget {
    pub fn new(budget: &[(Phase, usize)]) -> Result<Self> {
        Ok(Self { schedule: PhaseSchedule::from_budget(budget)? })
    }

    pub fn initial_phase(&self) -> Phase {
        self.schedule.segments()[0].phase
    }

    pub fn schedule(&self) -> &PhaseSchedule {
        &self.schedule
    }
}

impl PhaseTransition for StepBudget {
    fn next(&mut self, _robot: &RobotModel, k: usize, phase: Phase, _values: &Values) -> Result<Transition> {
        Ok(match self.schedule.phase_at(k + 1) {
            None => Transition::Stop,
            Some(next) if next == phase => Transition::Stay,
            Some(next) => Transition::Switch(next),
        })
    }
}
