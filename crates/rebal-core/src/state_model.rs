//! State models: the roles a replica can hold and how many of each a partition needs

use serde::{Deserialize, Serialize};

use crate::{RebalError, RebalResult};

/// Role of a single replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplicaState {
    Master,
    Slave,
    Leader,
    Standby,
    Offline,
    Dropped,
    Error,
}

impl std::fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ReplicaState::Master => "MASTER",
            ReplicaState::Slave => "SLAVE",
            ReplicaState::Leader => "LEADER",
            ReplicaState::Standby => "STANDBY",
            ReplicaState::Offline => "OFFLINE",
            ReplicaState::Dropped => "DROPPED",
            ReplicaState::Error => "ERROR",
        };
        f.pad(label)
    }
}

/// How many replicas of a partition must hold a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateCount {
    /// A fixed number of replicas
    Exact(u32),
    /// Every replica not claimed by the model's exact states
    Replicas,
}

/// One placed state of a model and its required count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRequirement {
    pub state: ReplicaState,
    pub count: StateCount,
}

/// Definition of a state model
///
/// `states` is in priority order; the first entry is the top state.
/// `transient_states` may show up in reported current state but are never placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateModelDefinition {
    pub name: String,
    pub states: Vec<StateRequirement>,
    #[serde(default)]
    pub transient_states: Vec<ReplicaState>,
}

impl StateModelDefinition {
    /// The highest-priority state, held by at most one replica per partition
    pub fn top_state(&self) -> Option<ReplicaState> {
        self.states.first().map(|r| r.state)
    }

    pub fn is_top_state(&self, state: ReplicaState) -> bool {
        self.top_state() == Some(state)
    }

    /// Whether `state` is a legal label for this model, placed or transient
    pub fn knows(&self, state: ReplicaState) -> bool {
        self.states.iter().any(|r| r.state == state) || self.transient_states.contains(&state)
    }

    /// Whether `state` is one the engine places
    pub fn is_placed_state(&self, state: ReplicaState) -> bool {
        self.states.iter().any(|r| r.state == state)
    }

    /// Check the definition is usable
    pub fn validate(&self) -> RebalResult<()> {
        let Some(top) = self.states.first() else {
            return Err(RebalError::InputInconsistency(format!(
                "state model '{}' defines no states",
                self.name
            )));
        };

        if !matches!(top.count, StateCount::Exact(1)) {
            return Err(RebalError::InputInconsistency(format!(
                "state model '{}' top state {} must have exactly one holder",
                self.name, top.state
            )));
        }

        for (i, req) in self.states.iter().enumerate() {
            if self.states[..i].iter().any(|r| r.state == req.state)
                || self.transient_states.contains(&req.state)
            {
                return Err(RebalError::InputInconsistency(format!(
                    "state model '{}' lists state {} more than once",
                    self.name, req.state
                )));
            }
        }

        let open = self
            .states
            .iter()
            .filter(|r| r.count == StateCount::Replicas)
            .count();
        if open > 1 {
            return Err(RebalError::InputInconsistency(format!(
                "state model '{}' has {} states sized by replica count, at most one is allowed",
                self.name, open
            )));
        }

        Ok(())
    }

    /// Expand the model into the ordered states a partition with `replicas`
    /// replicas must carry, top state first.
    pub fn requirement(&self, replicas: u32) -> RebalResult<Vec<ReplicaState>> {
        self.validate()?;

        if replicas == 0 {
            return Err(RebalError::InputInconsistency(format!(
                "state model '{}' expanded for zero replicas",
                self.name
            )));
        }

        let exact: u32 = self
            .states
            .iter()
            .map(|r| match r.count {
                StateCount::Exact(n) => n,
                StateCount::Replicas => 0,
            })
            .sum();
        let has_open = self.states.iter().any(|r| r.count == StateCount::Replicas);

        if exact > replicas || (!has_open && exact != replicas) {
            return Err(RebalError::InputInconsistency(format!(
                "state model '{}' needs {} fixed replicas but the resource has {}",
                self.name, exact, replicas
            )));
        }

        let mut states = Vec::with_capacity(replicas as usize);
        for req in &self.states {
            let n = match req.count {
                StateCount::Exact(n) => n,
                StateCount::Replicas => replicas - exact,
            };
            states.extend(std::iter::repeat(req.state).take(n as usize));
        }

        Ok(states)
    }
}

/// State models every snapshot knows about without registering them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltInStateModel {
    MasterSlave,
    LeaderStandby,
}

impl BuiltInStateModel {
    pub const ALL: [BuiltInStateModel; 2] = [
        BuiltInStateModel::MasterSlave,
        BuiltInStateModel::LeaderStandby,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltInStateModel::MasterSlave => "MasterSlave",
            BuiltInStateModel::LeaderStandby => "LeaderStandby",
        }
    }

    pub fn definition(&self) -> StateModelDefinition {
        let transient = vec![
            ReplicaState::Offline,
            ReplicaState::Dropped,
            ReplicaState::Error,
        ];
        let states = match self {
            BuiltInStateModel::MasterSlave => vec![
                StateRequirement {
                    state: ReplicaState::Master,
                    count: StateCount::Exact(1),
                },
                StateRequirement {
                    state: ReplicaState::Slave,
                    count: StateCount::Replicas,
                },
            ],
            BuiltInStateModel::LeaderStandby => vec![
                StateRequirement {
                    state: ReplicaState::Leader,
                    count: StateCount::Exact(1),
                },
                StateRequirement {
                    state: ReplicaState::Standby,
                    count: StateCount::Replicas,
                },
            ],
        };

        StateModelDefinition {
            name: self.name().to_string(),
            states,
            transient_states: transient,
        }
    }
}
