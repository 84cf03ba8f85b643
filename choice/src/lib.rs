// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Discrete-choice engine: coefficient tables, reproducible random streams, nested-logit choice
//! occasions and sampling of alternatives.
mod calculator;
mod coefficients;
mod logit;
mod observation;
mod random;
mod sampler;

pub use self::calculator::{
    Alternative, AlternativeMut, ChoicePayload, ChoiceProbabilityCalculator, ComponentHandle,
    ComponentKey, ComponentMut, Evaluation, OccasionFailure, OccasionKey, SimulatedChoice,
};
pub use self::coefficients::{
    Coefficient, CoefficientKind, CoefficientTable, MAX_COEFFICIENT_ID,
};
pub use self::logit::{inverse_sampling, LogitModel};
pub use self::observation::{
    EstimationSummary, Observation, ObservedAlternative, TermSummary, UtilityTerm,
};
pub use self::random::{stream_seed, RandomStream};
pub use self::sampler::{AlternativeSampler, SampleItem, SampleSet, SamplerSettings, StratumBand};
