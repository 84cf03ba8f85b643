// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Evaluation of one choice occasion: alternatives, shared utility components, nests, nested-logit
//! probabilities, simulated draws and estimation observations.
use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use hashbrown::HashMap;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::coefficients::{CoefficientKind, CoefficientTable};
use crate::logit::{inverse_sampling, LogitModel};
use crate::observation::{EstimationSummary, Observation, ObservedAlternative, UtilityTerm};
use crate::random::RandomStream;

/// Alternatives whose size is below this value are unavailable.
const MIN_SIZE: f64 = 1e-30;

/// Identifier of a choice occasion: the entity making the choice and a sequence number
/// distinguishing the occasions of that entity within a model.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
pub struct OccasionKey {
    pub entity_id: u64,
    pub sequence: u32,
}

impl OccasionKey {
    pub const fn new(entity_id: u64, sequence: u32) -> Self {
        OccasionKey {
            entity_id,
            sequence,
        }
    }
}

/// Domain object represented by an alternative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum ChoicePayload {
    #[default]
    None,
    /// A travel mode.
    Mode(u32),
    /// A parcel, with the zone containing it.
    Parcel { parcel_id: u64, zone_id: u32 },
    /// A day-pattern descriptor.
    DayPattern(u32),
    /// Arrival and departure time periods.
    TimePeriodPair { arrival: u16, departure: u16 },
}

/// Key of a utility component: a component group (e.g., "person traits" or "pair of persons")
/// and up to two positions within the group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentKey {
    pub group: u16,
    pub first: u16,
    pub second: u16,
}

impl ComponentKey {
    /// Key of a component identified by its group only.
    pub const fn group(group: u16) -> Self {
        ComponentKey {
            group,
            first: 0,
            second: 0,
        }
    }

    /// Key of a component attached to one position (e.g., one person of the household).
    pub const fn single(group: u16, first: u16) -> Self {
        ComponentKey {
            group,
            first,
            second: 0,
        }
    }

    /// Key of a component attached to an unordered pair of positions.
    pub fn pair(group: u16, a: u16, b: u16) -> Self {
        ComponentKey {
            group,
            first: a.min(b),
            second: a.max(b),
        }
    }
}

/// Handle of a utility component within the current occasion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ComponentHandle(usize);

/// Reason why a choice occasion could not be simulated or recorded.
///
/// These are soft failures: the entity making the choice is flagged invalid and the run
/// continues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum OccasionFailure {
    /// No alternative is available at the top level.
    NoAvailableAlternatives,
    /// Estimation mode: no alternative is flagged as chosen.
    NoChosenAlternative,
    /// Estimation mode: several alternatives are flagged as chosen.
    MultipleChosenAlternatives(usize),
    /// Estimation mode: the chosen alternative is unavailable.
    ChosenAlternativeUnavailable(usize),
    /// A utility term of an available alternative is NaN or infinite.
    NonFiniteTerm {
        alternative: usize,
        coefficient: Option<usize>,
    },
}

impl OccasionFailure {
    /// Short code identifying the reason of the failure.
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::NoAvailableAlternatives => "no_available_alternatives",
            Self::NoChosenAlternative => "no_chosen_alternative",
            Self::MultipleChosenAlternatives(_) => "multiple_chosen_alternatives",
            Self::ChosenAlternativeUnavailable(_) => "chosen_alternative_unavailable",
            Self::NonFiniteTerm { .. } => "non_finite_term",
        }
    }
}

impl fmt::Display for OccasionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAvailableAlternatives => write!(f, "no alternative is available"),
            Self::NoChosenAlternative => write!(f, "no alternative is chosen"),
            Self::MultipleChosenAlternatives(n) => write!(f, "{n} alternatives are chosen"),
            Self::ChosenAlternativeUnavailable(i) => {
                write!(f, "chosen alternative {i} is unavailable")
            }
            Self::NonFiniteTerm {
                alternative,
                coefficient: Some(coef),
            } => write!(
                f,
                "utility of alternative {alternative} has a non-finite term for coefficient {coef}"
            ),
            Self::NonFiniteTerm {
                alternative,
                coefficient: None,
            } => write!(f, "utility of alternative {alternative} is not finite"),
        }
    }
}

impl std::error::Error for OccasionFailure {}

/// Accumulated utility terms of an alternative or of a utility component.
#[derive(Clone, Debug, Default)]
struct TermAccumulator {
    utility: f64,
    size: f64,
    has_size: bool,
    fault: Option<usize>,
    terms: Vec<UtilityTerm>,
}

impl TermAccumulator {
    fn add(&mut self, coefficients: &CoefficientTable, record: bool, id: usize, value: f64) {
        let Some(coefficient) = coefficients.get(id) else {
            // Absent coefficients switch the term off.
            return;
        };
        let contribution = match coefficient.kind {
            CoefficientKind::Size => {
                self.has_size = true;
                let c = value * coefficient.value.exp();
                self.size += c;
                c
            }
            CoefficientKind::BaseSize => {
                self.has_size = true;
                self.size += value;
                value
            }
            _ => {
                let c = coefficient.value * value;
                self.utility += c;
                c
            }
        };
        if !contribution.is_finite() && self.fault.is_none() {
            self.fault = Some(id);
        }
        if record {
            self.terms.push(UtilityTerm {
                coefficient: id,
                value,
            });
        }
    }
}

/// A bundle of utility terms shared by several alternatives.
#[derive(Clone, Debug)]
struct UtilityComponent {
    key: ComponentKey,
    terms: TermAccumulator,
    sealed: bool,
}

/// A nest of the nested-logit tree.
#[derive(Clone, Debug)]
struct Nest {
    id: u32,
    theta_coefficient: usize,
    theta: f64,
    parent: Option<usize>,
    position: usize,
}

/// One option of a choice occasion.
#[derive(Clone, Debug, Default)]
pub struct Alternative {
    index: usize,
    available: bool,
    chosen: bool,
    payload: ChoicePayload,
    terms: TermAccumulator,
    components: Vec<ComponentHandle>,
    nest: Option<usize>,
    nest_position: usize,
}

impl Alternative {
    pub const fn index(&self) -> usize {
        self.index
    }

    pub const fn is_available(&self) -> bool {
        self.available
    }

    pub const fn is_chosen(&self) -> bool {
        self.chosen
    }

    pub const fn payload(&self) -> ChoicePayload {
        self.payload
    }
}

/// Utility, size and faults of an alternative, including its components.
struct Totals {
    utility: f64,
    size: f64,
    has_size: bool,
    fault: Option<usize>,
}

impl Totals {
    fn is_available_in_size(&self) -> bool {
        !self.has_size || self.size > MIN_SIZE
    }
}

/// Result of the evaluation of a choice occasion.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    /// Probability of each alternative, by index.
    pub probabilities: Vec<f64>,
    /// Log-sum of the whole occasion.
    pub logsum: f64,
    /// Log-sum of each nest, by nest id (`None` if no member of the nest is available).
    pub nest_logsums: Vec<(u32, Option<f64>)>,
}

impl Evaluation {
    /// Returns the log-sum of the given nest.
    pub fn nest_logsum(&self, nest_id: u32) -> Option<f64> {
        self.nest_logsums
            .iter()
            .find(|(id, _)| *id == nest_id)
            .and_then(|(_, ls)| *ls)
    }
}

/// Outcome of a simulated choice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulatedChoice {
    pub index: usize,
    pub payload: ChoicePayload,
    pub probability: f64,
}

/// Owner of the alternatives of one choice occasion at a time.
///
/// A calculator is reused across the occasions of one model: [start_occasion] clears the
/// previous occasion but keeps the allocations.
///
/// [start_occasion]: ChoiceProbabilityCalculator::start_occasion
#[derive(Clone, Debug)]
pub struct ChoiceProbabilityCalculator {
    model: String,
    coefficients: Arc<CoefficientTable>,
    estimation: bool,
    key: OccasionKey,
    alternatives: Vec<Alternative>,
    components: Vec<UtilityComponent>,
    component_index: HashMap<ComponentKey, ComponentHandle>,
    nests: Vec<Nest>,
    nest_index: HashMap<u32, usize>,
    summary: EstimationSummary,
}

impl ChoiceProbabilityCalculator {
    /// Creates a calculator for a model.
    ///
    /// In estimation mode, the value of every utility term is recorded so that the occasion can
    /// be written as an [Observation].
    pub fn new(model: &str, coefficients: Arc<CoefficientTable>, estimation: bool) -> Self {
        ChoiceProbabilityCalculator {
            model: model.to_owned(),
            coefficients,
            estimation,
            key: OccasionKey::default(),
            alternatives: Vec::new(),
            components: Vec::new(),
            component_index: HashMap::new(),
            nests: Vec::new(),
            nest_index: HashMap::new(),
            summary: EstimationSummary::default(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn coefficients(&self) -> &CoefficientTable {
        &self.coefficients
    }

    pub const fn is_estimation(&self) -> bool {
        self.estimation
    }

    /// Key of the current occasion.
    pub const fn key(&self) -> OccasionKey {
        self.key
    }

    /// Summary of the observations written so far.
    pub const fn summary(&self) -> &EstimationSummary {
        &self.summary
    }

    /// Starts a new choice occasion, discarding the alternatives, components and nests of the
    /// previous one.
    pub fn start_occasion(&mut self, key: OccasionKey) {
        self.key = key;
        self.alternatives.clear();
        self.components.clear();
        self.component_index.clear();
        self.nests.clear();
        self.nest_index.clear();
    }

    /// Number of alternatives of the current occasion.
    pub fn nb_alternatives(&self) -> usize {
        self.alternatives.len()
    }

    /// Returns the alternative with the given index, if it exists.
    pub fn alternative(&self, index: usize) -> Option<&Alternative> {
        self.alternatives.get(index)
    }

    /// Returns the alternative with the given index, creating it if needed, and sets its
    /// availability and chosen flags.
    ///
    /// Repeated calls with the same index return the same alternative. Indices must be dense:
    /// an index larger than the number of existing alternatives is an error.
    pub fn get_alternative(
        &mut self,
        index: usize,
        available: bool,
        chosen: bool,
    ) -> Result<AlternativeMut<'_>> {
        match index.cmp(&self.alternatives.len()) {
            std::cmp::Ordering::Greater => bail!(
                "Model `{}`: alternative index {index} would leave a gap (only {} alternatives)",
                self.model,
                self.alternatives.len()
            ),
            std::cmp::Ordering::Equal => self.alternatives.push(Alternative {
                index,
                ..Default::default()
            }),
            std::cmp::Ordering::Less => {}
        }
        let alternative = &mut self.alternatives[index];
        alternative.available = available;
        alternative.chosen = chosen;
        Ok(AlternativeMut {
            alternative,
            components: &mut self.components,
            nests: &mut self.nests,
            nest_index: &mut self.nest_index,
            coefficients: &self.coefficients,
            record: self.estimation,
        })
    }

    /// Creates the utility component with the given key and returns its handle.
    ///
    /// If the component already exists, its handle is returned and nothing is created.
    pub fn create_utility_component(&mut self, key: ComponentKey) -> ComponentHandle {
        if let Some(&handle) = self.component_index.get(&key) {
            return handle;
        }
        let handle = ComponentHandle(self.components.len());
        self.components.push(UtilityComponent {
            key,
            terms: TermAccumulator::default(),
            sealed: false,
        });
        self.component_index.insert(key, handle);
        handle
    }

    /// Returns the handle of the utility component with the given key, if it exists.
    pub fn utility_component(&self, key: ComponentKey) -> Option<ComponentHandle> {
        self.component_index.get(&key).copied()
    }

    /// Returns a mutable view of a utility component.
    ///
    /// Returns an error if the component is already attached to an alternative.
    pub fn utility_component_mut(&mut self, handle: ComponentHandle) -> Result<ComponentMut<'_>> {
        let component = self
            .components
            .get_mut(handle.0)
            .ok_or_else(|| anyhow!("Unknown utility component {:?}", handle))?;
        if component.sealed {
            bail!(
                "Model `{}`: utility component {:?} is attached to an alternative and cannot be \
                modified",
                self.model,
                component.key
            );
        }
        Ok(ComponentMut {
            component,
            coefficients: &self.coefficients,
            record: self.estimation,
        })
    }

    /// Utility of a component.
    pub fn component_utility(&self, handle: ComponentHandle) -> Option<f64> {
        self.components.get(handle.0).map(|c| c.terms.utility)
    }

    /// Places nest `child` inside nest `parent`, creating the parent nest if needed.
    ///
    /// Returns an error if the child nest does not exist, if it already has another parent, or
    /// if the link would create a cycle.
    pub fn add_nest_to_nest(
        &mut self,
        child: u32,
        parent: u32,
        position: usize,
        theta_coefficient: usize,
    ) -> Result<()> {
        let child_idx = *self
            .nest_index
            .get(&child)
            .ok_or_else(|| anyhow!("Model `{}`: unknown nest {child}", self.model))?;
        let parent_idx = register_nest(
            &mut self.nests,
            &mut self.nest_index,
            &self.coefficients,
            parent,
            theta_coefficient,
        )?;
        match self.nests[child_idx].parent {
            Some(p) if p == parent_idx => return Ok(()),
            Some(p) => bail!(
                "Model `{}`: nest {child} is already in nest {}",
                self.model,
                self.nests[p].id
            ),
            None => {}
        }
        let mut current = Some(parent_idx);
        while let Some(idx) = current {
            if idx == child_idx {
                bail!(
                    "Model `{}`: placing nest {child} in nest {parent} creates a cycle",
                    self.model
                );
            }
            current = self.nests[idx].parent;
        }
        self.nests[child_idx].parent = Some(parent_idx);
        self.nests[child_idx].position = position;
        Ok(())
    }

    /// Returns the id of the parent nest of a nest and its position in that parent.
    pub fn nest_parent(&self, nest_id: u32) -> Option<(u32, usize)> {
        let nest = &self.nests[*self.nest_index.get(&nest_id)?];
        nest.parent.map(|p| (self.nests[p].id, nest.position))
    }

    fn totals(&self, alternative: &Alternative) -> Totals {
        let mut totals = Totals {
            utility: alternative.terms.utility,
            size: alternative.terms.size,
            has_size: alternative.terms.has_size,
            fault: alternative.terms.fault,
        };
        for handle in alternative.components.iter() {
            let component = &self.components[handle.0].terms;
            totals.utility += component.utility;
            totals.size += component.size;
            totals.has_size |= component.has_size;
            totals.fault = totals.fault.or(component.fault);
        }
        totals
    }

    /// Utility of an alternative, including its components and its size term.
    ///
    /// Returns `None` for an unavailable alternative.
    fn alternative_value(
        &self,
        alternative: &Alternative,
        size_multiplier: f64,
    ) -> Result<Option<f64>, OccasionFailure> {
        if !alternative.available {
            return Ok(None);
        }
        let totals = self.totals(alternative);
        if let Some(coefficient) = totals.fault {
            return Err(OccasionFailure::NonFiniteTerm {
                alternative: alternative.index,
                coefficient: Some(coefficient),
            });
        }
        if !totals.is_available_in_size() {
            return Ok(None);
        }
        let mut utility = totals.utility;
        if totals.has_size {
            utility += totals.size.ln() * size_multiplier;
        }
        if !utility.is_finite() {
            return Err(OccasionFailure::NonFiniteTerm {
                alternative: alternative.index,
                coefficient: None,
            });
        }
        Ok(Some(utility))
    }

    /// Total utility of an alternative, excluding its size term.
    pub fn alternative_utility(&self, index: usize) -> Option<f64> {
        self.alternatives
            .get(index)
            .map(|alt| self.totals(alt).utility)
    }

    fn nest_depth(&self, mut idx: usize) -> usize {
        let mut depth = 0;
        while let Some(parent) = self.nests[idx].parent {
            depth += 1;
            idx = parent;
        }
        depth
    }

    /// Computes the nested-logit probabilities and log-sums of the current occasion.
    ///
    /// Nests are evaluated bottom-up: the log-sum of a nest is its utility at the level of its
    /// parent. The probability of an alternative is the product of its conditional probabilities
    /// along the path to the root.
    pub fn evaluate(&self) -> Result<Evaluation, OccasionFailure> {
        let size_multiplier = self.coefficients.size_multiplier();
        let values = self
            .alternatives
            .iter()
            .map(|alt| self.alternative_value(alt, size_multiplier))
            .collect::<Result<Vec<_>, _>>()?;
        let mut children: Vec<Vec<Option<f64>>> = vec![Vec::new(); self.nests.len()];
        let mut top_level = Vec::new();
        for (alt, &value) in self.alternatives.iter().zip(values.iter()) {
            match alt.nest {
                Some(nest) => children[nest].push(value),
                None => top_level.push(value),
            }
        }
        let mut order: Vec<usize> = (0..self.nests.len()).collect();
        order.sort_by_key(|&idx| Reverse(self.nest_depth(idx)));
        let mut nest_values: Vec<Option<f64>> = vec![None; self.nests.len()];
        for idx in order {
            let logsum = LogitModel::new(self.nests[idx].theta).logsum(&children[idx]);
            let value = (logsum > f64::NEG_INFINITY).then_some(logsum);
            nest_values[idx] = value;
            match self.nests[idx].parent {
                Some(parent) => children[parent].push(value),
                None => top_level.push(value),
            }
        }
        let root = LogitModel::default();
        let logsum = root.logsum(&top_level);
        if logsum == f64::NEG_INFINITY {
            return Err(OccasionFailure::NoAvailableAlternatives);
        }
        // Log-sum and scale of the choice set containing a node.
        let scale = |parent: Option<usize>| match parent {
            Some(p) => (
                nest_values[p].unwrap_or(f64::NEG_INFINITY),
                LogitModel::new(self.nests[p].theta),
            ),
            None => (logsum, root),
        };
        let probabilities = self
            .alternatives
            .iter()
            .zip(values.iter())
            .map(|(alt, value)| {
                let Some(value) = value else {
                    return 0.0;
                };
                let (ls, model) = scale(alt.nest);
                let mut p = model.conditional_probability(*value, ls);
                let mut node = alt.nest;
                while let Some(idx) = node {
                    let parent = self.nests[idx].parent;
                    let (ls, model) = scale(parent);
                    p *= nest_values[idx].map_or(0.0, |v| model.conditional_probability(v, ls));
                    node = parent;
                }
                p
            })
            .collect();
        let nest_logsums = self
            .nests
            .iter()
            .zip(nest_values)
            .map(|(nest, value)| (nest.id, value))
            .collect();
        Ok(Evaluation {
            probabilities,
            logsum,
            nest_logsums,
        })
    }

    /// Returns the probability of each alternative of the current occasion.
    pub fn probabilities(&self) -> Result<Vec<f64>, OccasionFailure> {
        self.evaluate().map(|eval| eval.probabilities)
    }

    /// Returns the log-sum of the current occasion, to be used as accessibility in other models.
    pub fn logsum(&self) -> Result<f64, OccasionFailure> {
        self.evaluate().map(|eval| eval.logsum)
    }

    /// Draws the chosen alternative from the probability distribution of the current occasion.
    ///
    /// One uniform value is drawn from `stream` and the cumulative distribution is walked in
    /// alternative index order.
    pub fn simulate_choice(
        &self,
        stream: &mut RandomStream,
    ) -> Result<SimulatedChoice, OccasionFailure> {
        let evaluation = self.evaluate()?;
        let u = stream.uniform01();
        let index = inverse_sampling(&evaluation.probabilities, u)
            .ok_or(OccasionFailure::NoAvailableAlternatives)?;
        let alternative = &self.alternatives[index];
        trace!(
            "model={} entity={} occasion={} chosen={} probability={:.6}",
            self.model,
            self.key.entity_id,
            self.key.sequence,
            index,
            evaluation.probabilities[index]
        );
        Ok(SimulatedChoice {
            index,
            payload: alternative.payload,
            probability: evaluation.probabilities[index],
        })
    }

    /// Checks the current occasion and returns its estimation record.
    ///
    /// Exactly one alternative must be chosen and it must be available. The outcome is tallied
    /// in the estimation summary of the calculator.
    pub fn write_observation(&mut self) -> Result<Observation, OccasionFailure> {
        match self.build_observation() {
            Ok(observation) => {
                self.summary.record_accepted(&observation);
                Ok(observation)
            }
            Err(failure) => {
                self.summary.record_rejected();
                Err(failure)
            }
        }
    }

    fn build_observation(&self) -> Result<Observation, OccasionFailure> {
        let mut chosen = self.alternatives.iter().filter(|alt| alt.chosen);
        let chosen_index = match (chosen.next(), chosen.count()) {
            (None, _) => return Err(OccasionFailure::NoChosenAlternative),
            (Some(alt), 0) => alt.index,
            (Some(_), n) => return Err(OccasionFailure::MultipleChosenAlternatives(n + 1)),
        };
        let mut alternatives = Vec::with_capacity(self.alternatives.len());
        for alt in self.alternatives.iter() {
            let totals = self.totals(alt);
            let available = alt.available && totals.is_available_in_size();
            if available {
                if let Some(coefficient) = totals.fault {
                    return Err(OccasionFailure::NonFiniteTerm {
                        alternative: alt.index,
                        coefficient: Some(coefficient),
                    });
                }
            }
            if alt.chosen && !available {
                return Err(OccasionFailure::ChosenAlternativeUnavailable(alt.index));
            }
            let mut terms = alt.terms.terms.clone();
            for handle in alt.components.iter() {
                terms.extend_from_slice(&self.components[handle.0].terms.terms);
            }
            alternatives.push(ObservedAlternative {
                index: alt.index,
                available,
                chosen: alt.chosen,
                payload: alt.payload,
                nest: alt
                    .nest
                    .map(|idx| (self.nests[idx].id, alt.nest_position)),
                terms,
            });
        }
        Ok(Observation {
            model: self.model.clone(),
            key: self.key,
            chosen_index,
            alternatives,
        })
    }
}

fn register_nest(
    nests: &mut Vec<Nest>,
    nest_index: &mut HashMap<u32, usize>,
    coefficients: &CoefficientTable,
    id: u32,
    theta_coefficient: usize,
) -> Result<usize> {
    if let Some(&idx) = nest_index.get(&id) {
        if nests[idx].theta_coefficient != theta_coefficient {
            bail!(
                "Model `{}`: nest {id} uses theta coefficients {} and {theta_coefficient}",
                coefficients.model(),
                nests[idx].theta_coefficient
            );
        }
        return Ok(idx);
    }
    let theta = coefficients
        .get(theta_coefficient)
        .ok_or_else(|| {
            anyhow!(
                "Model `{}`: missing theta coefficient {theta_coefficient} for nest {id}",
                coefficients.model()
            )
        })?
        .value;
    if !(theta > 0.0 && theta.is_finite()) {
        bail!(
            "Model `{}`: theta of nest {id} must be positive, got {theta}",
            coefficients.model()
        );
    }
    let idx = nests.len();
    nests.push(Nest {
        id,
        theta_coefficient,
        theta,
        parent: None,
        position: 0,
    });
    nest_index.insert(id, idx);
    Ok(idx)
}

/// Mutable view of an alternative of the current occasion.
pub struct AlternativeMut<'a> {
    alternative: &'a mut Alternative,
    components: &'a mut Vec<UtilityComponent>,
    nests: &'a mut Vec<Nest>,
    nest_index: &'a mut HashMap<u32, usize>,
    coefficients: &'a CoefficientTable,
    record: bool,
}

impl AlternativeMut<'_> {
    pub fn index(&self) -> usize {
        self.alternative.index
    }

    pub fn is_available(&self) -> bool {
        self.alternative.available
    }

    /// Sets the domain object represented by the alternative.
    pub fn set_payload(&mut self, payload: ChoicePayload) -> &mut Self {
        self.alternative.payload = payload;
        self
    }

    /// Adds `coefficient(id) * value` to the utility of the alternative.
    ///
    /// Size coefficients add to the size of the alternative instead. Coefficients absent from
    /// the table contribute nothing.
    pub fn add_utility_term(&mut self, id: usize, value: f64) -> &mut Self {
        self.alternative
            .terms
            .add(self.coefficients, self.record, id, value);
        self
    }

    /// Attaches a utility component to the alternative.
    ///
    /// The component cannot be modified afterwards. Attaching the same component twice has no
    /// effect.
    pub fn add_utility_component(&mut self, handle: ComponentHandle) -> &mut Self {
        if let Some(component) = self.components.get_mut(handle.0) {
            component.sealed = true;
            if !self.alternative.components.contains(&handle) {
                self.alternative.components.push(handle);
            }
        }
        self
    }

    /// Places the alternative at `position` in nest `nest_id`, creating the nest if needed.
    ///
    /// Returns an error if the theta coefficient is missing or not positive, or if the
    /// alternative is already in another nest.
    pub fn add_nested_alternative(
        &mut self,
        nest_id: u32,
        position: usize,
        theta_coefficient: usize,
    ) -> Result<&mut Self> {
        let idx = register_nest(
            self.nests,
            self.nest_index,
            self.coefficients,
            nest_id,
            theta_coefficient,
        )?;
        if let Some(current) = self.alternative.nest {
            if current != idx {
                bail!(
                    "Model `{}`: alternative {} is already in nest {}",
                    self.coefficients.model(),
                    self.alternative.index,
                    self.nests[current].id
                );
            }
        }
        self.alternative.nest = Some(idx);
        self.alternative.nest_position = position;
        Ok(self)
    }
}

/// Mutable view of a utility component that is not attached yet.
pub struct ComponentMut<'a> {
    component: &'a mut UtilityComponent,
    coefficients: &'a CoefficientTable,
    record: bool,
}

impl ComponentMut<'_> {
    pub fn key(&self) -> ComponentKey {
        self.component.key
    }

    /// Adds `coefficient(id) * value` to the utility of the component.
    pub fn add_utility_term(&mut self, id: usize, value: f64) -> &mut Self {
        self.component
            .terms
            .add(self.coefficients, self.record, id, value);
        self
    }
}
