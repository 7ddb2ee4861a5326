//! Live model parameters refreshed at each forcing update.
//!
//! The right-hand side reads a [`ParameterVector`] and never writes it. Only
//! the forcing-update callback of the engine mutates it, and every mutation
//! is followed by a snapshot into the parameter history.

use std::fmt;

use serde::Serialize;

use super::forcing::ForcingVariable;

/// One named per-basin parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasinField {
    Precipitation,
    Evaporation,
    Drainage,
    Infiltration,
    UrbanRunoff,
    Upstream,
    Discharge,
    ManagedRelease,
    Abstraction,
}

impl BasinField {
    /// Every field in storage order.
    pub const ALL: [BasinField; 9] = [
        BasinField::Precipitation,
        BasinField::Evaporation,
        BasinField::Drainage,
        BasinField::Infiltration,
        BasinField::UrbanRunoff,
        BasinField::Upstream,
        BasinField::Discharge,
        BasinField::ManagedRelease,
        BasinField::Abstraction,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BasinField::Discharge => "discharge",
            BasinField::ManagedRelease => "managed_release",
            BasinField::Abstraction => "abstraction",
            BasinField::Precipitation => ForcingVariable::Precipitation.name(),
            BasinField::Evaporation => ForcingVariable::Evaporation.name(),
            BasinField::Drainage => ForcingVariable::Drainage.name(),
            BasinField::Infiltration => ForcingVariable::Infiltration.name(),
            BasinField::UrbanRunoff => ForcingVariable::UrbanRunoff.name(),
            BasinField::Upstream => ForcingVariable::Upstream.name(),
        }
    }

    /// Inverse of [`BasinField::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl From<ForcingVariable> for BasinField {
    fn from(v: ForcingVariable) -> Self {
        match v {
            ForcingVariable::Precipitation => BasinField::Precipitation,
            ForcingVariable::Evaporation => BasinField::Evaporation,
            ForcingVariable::Drainage => BasinField::Drainage,
            ForcingVariable::Infiltration => BasinField::Infiltration,
            ForcingVariable::UrbanRunoff => BasinField::UrbanRunoff,
            ForcingVariable::Upstream => BasinField::Upstream,
        }
    }
}

impl fmt::Display for BasinField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters of one basin, held constant between forcing updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BasinParameters {
    /// Precipitation rate (m/s).
    pub precipitation: f64,
    /// Potential evaporation rate (m/s), before the open-water factor.
    pub evaporation: f64,
    /// Drainage into the basin (m³/s).
    pub drainage: f64,
    /// Infiltration out of the basin (m³/s).
    pub infiltration: f64,
    /// Urban runoff out of the basin (m³/s).
    pub urban_runoff: f64,
    /// External upstream inflow (m³/s).
    pub upstream: f64,
    /// Curve discharge at the storage of the last update (m³/s, free-flow only).
    pub discharge: f64,
    /// Signed managed flux (m³/s, controlled only): positive supplies water.
    pub managed_release: f64,
    /// Sum of volumes allocated to the basin's users (m³/s).
    pub abstraction: f64,
}

impl BasinParameters {
    pub fn get(&self, field: BasinField) -> f64 {
        match field {
            BasinField::Precipitation => self.precipitation,
            BasinField::Evaporation => self.evaporation,
            BasinField::Drainage => self.drainage,
            BasinField::Infiltration => self.infiltration,
            BasinField::UrbanRunoff => self.urban_runoff,
            BasinField::Upstream => self.upstream,
            BasinField::Discharge => self.discharge,
            BasinField::ManagedRelease => self.managed_release,
            BasinField::Abstraction => self.abstraction,
        }
    }

    pub fn set(&mut self, field: BasinField, value: f64) {
        let slot = match field {
            BasinField::Precipitation => &mut self.precipitation,
            BasinField::Evaporation => &mut self.evaporation,
            BasinField::Drainage => &mut self.drainage,
            BasinField::Infiltration => &mut self.infiltration,
            BasinField::UrbanRunoff => &mut self.urban_runoff,
            BasinField::Upstream => &mut self.upstream,
            BasinField::Discharge => &mut self.discharge,
            BasinField::ManagedRelease => &mut self.managed_release,
            BasinField::Abstraction => &mut self.abstraction,
        };
        *slot = value;
    }
}

/// Allocation state of one water user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserAllocation {
    /// Basin the user abstracts from.
    pub basin_id: i32,
    /// User label, unique within the basin.
    pub user: String,
    /// Priority rank, lower is served first.
    pub priority: u32,
    /// Demand at the last update (m³/s).
    pub demand: f64,
    /// Volume rate granted at the last update (m³/s).
    pub allocated: f64,
}

/// Every live parameter of the model.
///
/// Parameters are addressable by flat names such as
/// `"basin.3.precipitation"` or `"user.3.farm.allocated"`.
///
/// # Examples
///
/// ```
/// use basin_sim::sim::params::{BasinField, ParameterVector};
///
/// let mut params = ParameterVector::new(vec![3, 7]);
/// params.set(1, BasinField::Upstream, 2.5);
/// assert_eq!(params.get_named("basin.7.upstream"), Some(2.5));
/// assert_eq!(params.get_named("basin.9.upstream"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterVector {
    basin_ids: Vec<i32>,
    basins: Vec<BasinParameters>,
    allocations: Vec<UserAllocation>,
}

impl ParameterVector {
    /// All-zero parameters for basins ordered as `basin_ids`.
    pub fn new(basin_ids: Vec<i32>) -> Self {
        let basins = vec![BasinParameters::default(); basin_ids.len()];
        Self {
            basin_ids,
            basins,
            allocations: Vec::new(),
        }
    }

    /// Registers a user with zero demand and allocation.
    pub fn add_user(&mut self, basin_id: i32, user: &str, priority: u32) {
        self.allocations.push(UserAllocation {
            basin_id,
            user: user.to_string(),
            priority,
            demand: 0.0,
            allocated: 0.0,
        });
    }

    /// Parameters of the basin at index `i`.
    pub fn basin(&self, i: usize) -> &BasinParameters {
        &self.basins[i]
    }

    /// Basin ids, in index order.
    pub fn basin_ids(&self) -> &[i32] {
        &self.basin_ids
    }

    /// Sets `field` of the basin at index `i`.
    pub fn set(&mut self, i: usize, field: BasinField, value: f64) {
        self.basins[i].set(field, value);
    }

    /// Users of `basin_id`, in registration order.
    pub fn users_of(&self, basin_id: i32) -> impl Iterator<Item = &UserAllocation> {
        self.allocations
            .iter()
            .filter(move |a| a.basin_id == basin_id)
    }

    /// Mutable users of `basin_id`, in registration order.
    pub fn users_of_mut(&mut self, basin_id: i32) -> impl Iterator<Item = &mut UserAllocation> {
        self.allocations
            .iter_mut()
            .filter(move |a| a.basin_id == basin_id)
    }

    /// Looks a parameter up by its flat name.
    pub fn get_named(&self, name: &str) -> Option<f64> {
        let mut parts = name.split('.');
        match parts.next()? {
            "basin" => {
                let id: i32 = parts.next()?.parse().ok()?;
                let field = BasinField::from_name(parts.next()?)?;
                if parts.next().is_some() {
                    return None;
                }
                let i = self.basin_ids.iter().position(|&b| b == id)?;
                Some(self.basins[i].get(field))
            }
            "user" => {
                let id: i32 = parts.next()?.parse().ok()?;
                let rest: Vec<&str> = parts.collect();
                let (attr, label) = rest.split_last()?;
                let label = label.join(".");
                let user = self
                    .allocations
                    .iter()
                    .find(|a| a.basin_id == id && a.user == label)?;
                match *attr {
                    "demand" => Some(user.demand),
                    "allocated" => Some(user.allocated),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Every parameter as `(name, value)`, basins first.
    pub fn named_values(&self) -> Vec<(String, f64)> {
        let mut out = Vec::with_capacity(self.basins.len() * BasinField::ALL.len());
        for (id, params) in self.basin_ids.iter().zip(&self.basins) {
            for field in BasinField::ALL {
                out.push((format!("basin.{id}.{field}"), params.get(field)));
            }
        }
        for a in &self.allocations {
            out.push((format!("user.{}.{}.demand", a.basin_id, a.user), a.demand));
            out.push((
                format!("user.{}.{}.allocated", a.basin_id, a.user),
                a.allocated,
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_round_trip() {
        for field in BasinField::ALL {
            assert_eq!(BasinField::from_name(field.name()), Some(field));
        }
        assert_eq!(BasinField::from_name("storage"), None);
    }

    #[test]
    fn forcing_variables_map_to_same_named_fields() {
        for v in ForcingVariable::ALL {
            assert_eq!(BasinField::from(v).name(), v.name());
        }
    }

    #[test]
    fn set_by_index() {
        let mut p = ParameterVector::new(vec![1, 2]);
        p.set(0, BasinField::Discharge, 4.0);
        assert_eq!(p.basin(0).discharge, 4.0);
        assert_eq!(p.basin(1).discharge, 0.0);
        assert_eq!(p.get_named("basin.1.discharge"), Some(4.0));
    }

    #[test]
    fn user_names_may_contain_dots() {
        let mut p = ParameterVector::new(vec![5]);
        p.add_user(5, "city.north", 1);
        if let Some(u) = p.users_of_mut(5).next() {
            u.allocated = 3.0;
        }
        assert_eq!(p.get_named("user.5.city.north.allocated"), Some(3.0));
        assert_eq!(p.get_named("user.5.city.north.demand"), Some(0.0));
        assert_eq!(p.get_named("user.5.city.north.priority"), None);
    }

    #[test]
    fn named_values_cover_every_parameter() {
        let mut p = ParameterVector::new(vec![1, 2]);
        p.add_user(2, "farm", 1);
        let named = p.named_values();
        assert_eq!(named.len(), 2 * BasinField::ALL.len() + 2);
        for (name, value) in &named {
            assert_eq!(p.get_named(name), Some(*value), "{name}");
        }
    }
}
