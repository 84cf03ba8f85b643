// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Sampling of alternatives from a large universe.
//!
//! The universe is split into distance strata. Each stratum receives a number of draws and, within
//! a stratum, members are drawn without replacement with probability proportional to their size
//! (randomized systematic sampling). Every sampled member carries the correction term
//! `ln(1 / inclusion probability)`, which the model adds to the utility of the alternative with a
//! fixed coefficient of 1.
use anyhow::{bail, Result};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::calculator::{AlternativeMut, ChoiceProbabilityCalculator};
use crate::random::RandomStream;

/// Salt of the substream used to draw the sample.
const SAMPLER_SALT: u32 = 0x5a3;

/// A distance band of the sampling strata.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct StratumBand {
    /// Upper bound (inclusive) of the distance of the members of the band.
    pub max_distance: f64,
    /// Target share of the draws allocated to the band.
    pub share: f64,
}

/// Parameters of an [AlternativeSampler].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SamplerSettings {
    /// Number of alternatives to sample.
    pub sample_size: usize,
    /// Distance strata, by increasing upper bound. Members farther than the last bound form a
    /// last stratum which receives the remaining share of the draws.
    #[serde(default)]
    pub strata: Vec<StratumBand>,
    /// Members farther than this distance are not eligible.
    #[serde(default)]
    pub max_distance: Option<f64>,
}

impl SamplerSettings {
    /// Checks that the settings are consistent.
    pub fn validate(&self) -> Result<()> {
        if self.sample_size == 0 {
            bail!("The sample size must be positive");
        }
        let mut previous = f64::NEG_INFINITY;
        let mut total_share = 0.0;
        for band in self.strata.iter() {
            if !(band.max_distance > previous) {
                bail!("The upper bounds of the strata must be increasing");
            }
            if !(band.share >= 0.0) {
                bail!("The shares of the strata must be non-negative");
            }
            previous = band.max_distance;
            total_share += band.share;
        }
        if total_share > 1.0 + 1e-9 {
            bail!("The shares of the strata sum to {total_share}, more than 1");
        }
        Ok(())
    }

    fn stratum_of(&self, distance: f64) -> usize {
        self.strata
            .iter()
            .position(|band| distance <= band.max_distance)
            .unwrap_or(self.strata.len())
    }

    fn shares(&self) -> Vec<f64> {
        let mut shares: Vec<f64> = self.strata.iter().map(|band| band.share).collect();
        let total: f64 = shares.iter().sum();
        shares.push((1.0 - total).max(0.0));
        shares
    }
}

/// A member of the universe selected in a sample.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct SampleItem {
    /// Index of the member in the universe.
    pub index: usize,
    /// Size weight of the member.
    pub weight: f64,
    /// Probability that the member is included in the sample.
    pub inclusion_probability: f64,
    /// Sampling correction term, `ln(1 / inclusion_probability)`.
    pub adjustment: f64,
    /// `true` if the member is the forced (observed) alternative.
    pub forced: bool,
    /// `false` if the forced member fails the eligibility filter.
    pub eligible: bool,
}

/// Result of a sampling.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct SampleSet {
    /// Sampled members, by increasing universe index.
    pub items: Vec<SampleItem>,
    /// `true` if the eligible universe was not larger than the sample size and was taken whole.
    pub whole_universe: bool,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns `true` if the member with the given universe index is in the sample.
    pub fn contains(&self, index: usize) -> bool {
        self.items.iter().any(|item| item.index == index)
    }

    /// Registers each sampled member as an alternative of the current occasion of `calculator`,
    /// in the order of the sample.
    ///
    /// Each alternative receives the sampling correction term on `adjustment_coefficient`. The
    /// forced member is flagged as chosen and an ineligible forced member is unavailable.
    /// `build` then adds the model-specific terms.
    pub fn register_alternatives<F>(
        &self,
        calculator: &mut ChoiceProbabilityCalculator,
        adjustment_coefficient: usize,
        mut build: F,
    ) -> Result<()>
    where
        F: FnMut(&SampleItem, &mut AlternativeMut<'_>) -> Result<()>,
    {
        for (position, item) in self.items.iter().enumerate() {
            let mut alternative = calculator.get_alternative(position, item.eligible, item.forced)?;
            alternative.add_utility_term(adjustment_coefficient, item.adjustment);
            build(item, &mut alternative)?;
        }
        Ok(())
    }
}

/// Draws samples of alternatives from a weighted universe.
#[derive(Clone, Debug)]
pub struct AlternativeSampler {
    settings: SamplerSettings,
}

impl AlternativeSampler {
    pub fn new(settings: SamplerSettings) -> Result<Self> {
        settings.validate()?;
        Ok(AlternativeSampler { settings })
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    /// Draws a sample from a universe of `universe_size` members.
    ///
    /// `weight(i)` is the size of member `i` and `distance(i)` its distance to the origin of the
    /// choice; members with a non-positive weight or farther than the maximum distance are not
    /// eligible. `forced` is the observed alternative in estimation mode: it is always part of
    /// the sample.
    ///
    /// The draws use a substream of `stream`, which is not advanced.
    pub fn sample<W, D>(
        &self,
        universe_size: usize,
        weight: W,
        distance: D,
        forced: Option<usize>,
        stream: &RandomStream,
    ) -> SampleSet
    where
        W: Fn(usize) -> f64,
        D: Fn(usize) -> f64,
    {
        let k = self.settings.sample_size;
        let nb_strata = self.settings.strata.len() + 1;
        // Eligible members of each stratum, with their weight.
        let mut strata: Vec<Vec<(usize, f64)>> = vec![Vec::new(); nb_strata];
        let mut nb_eligible = 0;
        for i in 0..universe_size {
            let w = weight(i);
            if !(w > 0.0 && w.is_finite()) {
                continue;
            }
            let d = distance(i);
            if self.settings.max_distance.is_some_and(|max| d > max) {
                continue;
            }
            strata[self.settings.stratum_of(d)].push((i, w));
            nb_eligible += 1;
        }
        let forced_eligible = forced.and_then(|f| {
            strata
                .iter()
                .enumerate()
                .find_map(|(s, members)| members.iter().any(|&(i, _)| i == f).then_some(s))
        });

        if nb_eligible <= k {
            let mut items: Vec<SampleItem> = strata
                .into_iter()
                .flatten()
                .map(|(i, w)| SampleItem {
                    index: i,
                    weight: w,
                    inclusion_probability: 1.0,
                    adjustment: 0.0,
                    forced: Some(i) == forced,
                    eligible: true,
                })
                .collect();
            if let (Some(f), None) = (forced, forced_eligible) {
                items.push(ineligible_item(f, weight(f)));
            }
            items.sort_by_key(|item| item.index);
            return SampleSet {
                items,
                whole_universe: true,
            };
        }

        let mut rng = stream.substream(SAMPLER_SALT);
        let capacities: Vec<usize> = strata.iter().map(Vec::len).collect();
        let draws = allocate(k, &self.settings.shares(), &capacities);
        let mut items = Vec::with_capacity(k + 1);
        let mut forced_probability = None;
        for (s, members) in strata.iter().enumerate() {
            let probs = inclusion_probabilities(members, draws[s]);
            if let Some(f) = forced {
                if forced_eligible == Some(s) {
                    forced_probability = members
                        .iter()
                        .zip(probs.iter())
                        .find(|((i, _), _)| *i == f)
                        .map(|(_, &p)| p);
                }
            }
            for j in systematic_draw(&probs, &mut rng) {
                let (index, w) = members[j];
                items.push(SampleItem {
                    index,
                    weight: w,
                    inclusion_probability: probs[j],
                    adjustment: -probs[j].ln(),
                    forced: Some(index) == forced,
                    eligible: true,
                });
            }
        }

        if let Some(f) = forced {
            if !items.iter().any(|item| item.index == f) {
                let item = match forced_probability {
                    Some(p) => {
                        let w = weight(f);
                        let p = if p > 0.0 {
                            p
                        } else {
                            // The stratum of the forced member received no draw.
                            let total: f64 = strata.iter().flatten().map(|&(_, w)| w).sum();
                            (k as f64 * w / total).min(1.0)
                        };
                        SampleItem {
                            index: f,
                            weight: w,
                            inclusion_probability: p,
                            adjustment: -p.ln(),
                            forced: true,
                            eligible: true,
                        }
                    }
                    None => ineligible_item(f, weight(f)),
                };
                // Replace the drawn member with the lowest weight (the last one on ties), unless
                // it was drawn with certainty.
                let replaced = items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| item.inclusion_probability < 1.0)
                    .min_by(|(_, a), (_, b)| {
                        a.weight
                            .total_cmp(&b.weight)
                            .then_with(|| b.index.cmp(&a.index))
                    })
                    .map(|(pos, _)| pos);
                match replaced {
                    Some(pos) => items[pos] = item,
                    None => items.push(item),
                }
            }
        }
        items.sort_by_key(|item| item.index);
        debug!(
            "Sampled {} alternatives out of {} eligible members (entity {})",
            items.len(),
            nb_eligible,
            stream.entity_id()
        );
        SampleSet {
            items,
            whole_universe: false,
        }
    }
}

fn ineligible_item(index: usize, weight: f64) -> SampleItem {
    SampleItem {
        index,
        weight,
        inclusion_probability: 1.0,
        adjustment: 0.0,
        forced: true,
        eligible: false,
    }
}

/// Splits `sample_size` draws between the strata, proportionally to their share (largest
/// remainder method), without exceeding the number of members of each stratum.
fn allocate(sample_size: usize, shares: &[f64], capacities: &[usize]) -> Vec<usize> {
    let mut effective: Vec<f64> = shares
        .iter()
        .zip(capacities)
        .map(|(&s, &c)| if c > 0 { s } else { 0.0 })
        .collect();
    let mut total: f64 = effective.iter().sum();
    if total <= 0.0 {
        // Only strata without share have members: split equally between them.
        effective = capacities
            .iter()
            .map(|&c| if c > 0 { 1.0 } else { 0.0 })
            .collect();
        total = effective.iter().sum();
    }
    let exact: Vec<f64> = effective
        .iter()
        .map(|s| sample_size as f64 * s / total)
        .collect();
    let mut draws: Vec<usize> = exact.iter().map(|x| x.floor() as usize).collect();
    let assigned: usize = draws.iter().sum();
    let mut by_remainder: Vec<usize> = (0..draws.len()).collect();
    by_remainder.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    for &s in by_remainder
        .iter()
        .filter(|&&s| effective[s] > 0.0)
        .take(sample_size.saturating_sub(assigned))
    {
        draws[s] += 1;
    }
    let mut excess = 0;
    for (d, &c) in draws.iter_mut().zip(capacities) {
        if *d > c {
            excess += *d - c;
            *d = c;
        }
    }
    while excess > 0 {
        let candidate = (0..draws.len())
            .filter(|&s| draws[s] < capacities[s])
            .max_by(|&a, &b| effective[a].total_cmp(&effective[b]).then(b.cmp(&a)));
        match candidate {
            Some(s) => {
                draws[s] += 1;
                excess -= 1;
            }
            None => break,
        }
    }
    draws
}

/// Returns the probability of inclusion of each member in a sample of `n` draws without
/// replacement, proportional to weight.
///
/// Members whose proportional probability exceeds 1 are included with certainty and the draws
/// left are split among the other members.
fn inclusion_probabilities(members: &[(usize, f64)], n: usize) -> Vec<f64> {
    let mut certain = vec![false; members.len()];
    if n >= members.len() {
        return vec![1.0; members.len()];
    }
    loop {
        let nb_certain = certain.iter().filter(|&&c| c).count();
        let n_left = (n - nb_certain) as f64;
        let total: f64 = members
            .iter()
            .zip(certain.iter())
            .filter(|(_, &c)| !c)
            .map(|(&(_, w), _)| w)
            .sum();
        let mut changed = false;
        for (j, &(_, w)) in members.iter().enumerate() {
            if !certain[j] && n_left * w / total >= 1.0 {
                certain[j] = true;
                changed = true;
            }
        }
        if !changed {
            return members
                .iter()
                .zip(certain.iter())
                .map(|(&(_, w), &c)| if c { 1.0 } else { n_left * w / total })
                .collect();
        }
    }
}

/// Randomized systematic sampling: the members are visited in random order and a member is
/// drawn when the cumulative sum of the probabilities crosses one of the points `u, u + 1, ...`.
///
/// Returns the positions of the drawn members.
fn systematic_draw(probabilities: &[f64], rng: &mut RandomStream) -> Vec<usize> {
    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    rng.shuffle(&mut order);
    let mut drawn: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&j| probabilities[j] >= 1.0)
        .collect();
    let mut point = rng.uniform01();
    let mut cum = 0.0;
    for &j in order.iter().filter(|&&j| probabilities[j] < 1.0) {
        cum += probabilities[j];
        if point < cum {
            drawn.push(j);
            point += 1.0;
        }
    }
    drawn
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::calculator::{ChoicePayload, OccasionKey};
    use crate::coefficients::{Coefficient, CoefficientTable};

    const WEIGHTS: [f64; 8] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 20.0];

    fn sampler(sample_size: usize, strata: Vec<StratumBand>) -> AlternativeSampler {
        AlternativeSampler::new(SamplerSettings {
            sample_size,
            strata,
            max_distance: None,
        })
        .unwrap()
    }

    #[test]
    fn invalid_settings_test() {
        let settings = SamplerSettings {
            sample_size: 0,
            strata: Vec::new(),
            max_distance: None,
        };
        assert!(AlternativeSampler::new(settings).is_err());
        let band = |max_distance, share| StratumBand {
            max_distance,
            share,
        };
        let settings = SamplerSettings {
            sample_size: 2,
            strata: vec![band(5.0, 0.5), band(2.0, 0.2)],
            max_distance: None,
        };
        assert!(settings.validate().is_err());
        let settings = SamplerSettings {
            sample_size: 2,
            strata: vec![band(1.0, 0.7), band(2.0, 0.7)],
            max_distance: None,
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn allocate_test() {
        assert_eq!(allocate(4, &[0.5, 0.5], &[10, 10]), vec![2, 2]);
        assert_eq!(allocate(5, &[0.5, 0.5], &[10, 10]), vec![3, 2]);
        // Capacity is respected and the excess is redistributed.
        assert_eq!(allocate(6, &[0.8, 0.2], &[2, 10]), vec![2, 4]);
        // Empty strata get nothing.
        assert_eq!(allocate(3, &[0.5, 0.5], &[0, 10]), vec![0, 3]);
        // Strata with members but no share.
        assert_eq!(allocate(3, &[1.0, 0.0], &[0, 10]), vec![0, 3]);
    }

    #[test]
    fn inclusion_probabilities_test() {
        let members: Vec<(usize, f64)> = WEIGHTS.iter().copied().enumerate().collect();
        let probs = inclusion_probabilities(&members, 3);
        // 3 * 20 / 48 > 1: the last member is taken with certainty and the 2 other draws are
        // split among the members with a total weight of 28.
        assert_eq!(probs[7], 1.0);
        for j in 0..7 {
            assert!((probs[j] - 2.0 * WEIGHTS[j] / 28.0).abs() < 1e-12);
        }
        assert!((probs.iter().sum::<f64>() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn whole_universe_test() {
        let sampler = sampler(5, Vec::new());
        let stream = RandomStream::new(1);
        let weights = [1.0, 0.0, 2.0, 3.0];
        let sample = sampler.sample(4, |i| weights[i], |_| 1.0, None, &stream);
        assert!(sample.whole_universe);
        assert_eq!(sample.len(), 3);
        assert!(!sample.contains(1));
        assert!(sample.items.iter().all(|item| item.adjustment == 0.0));
    }

    #[test]
    fn unbiasedness_test() {
        let sampler = sampler(3, Vec::new());
        let mut stream = RandomStream::new(17);
        let nb_runs = 20_000;
        let mut counts = [0usize; 8];
        for run in 0..nb_runs {
            stream.reset(run, 4);
            let sample = sampler.sample(8, |i| WEIGHTS[i], |_| 0.0, None, &stream);
            assert_eq!(sample.len(), 3);
            for item in sample.items.iter() {
                counts[item.index] += 1;
                assert!((item.adjustment + item.inclusion_probability.ln()).abs() < 1e-12);
            }
        }
        assert_eq!(counts[7], nb_runs as usize);
        for j in 0..7 {
            let freq = counts[j] as f64 / nb_runs as f64;
            let expected = 2.0 * WEIGHTS[j] / 28.0;
            assert!(
                (freq - expected).abs() < 0.015,
                "member {j}: {freq} vs {expected}"
            );
        }
    }

    #[test]
    fn reproducibility_test() {
        let sampler = sampler(3, Vec::new());
        let mut stream = RandomStream::new(5);
        stream.reset(42, 1);
        let a = sampler.sample(8, |i| WEIGHTS[i], |_| 0.0, None, &stream);
        // Sampling does not advance the stream.
        let u = stream.clone().uniform01();
        let b = sampler.sample(8, |i| WEIGHTS[i], |_| 0.0, None, &stream);
        assert_eq!(a, b);
        assert_eq!(stream.uniform01(), u);
    }

    #[test]
    fn forced_member_test() {
        let sampler = sampler(3, Vec::new());
        let mut stream = RandomStream::new(9);
        for run in 0..500 {
            stream.reset(run, 0);
            let sample = sampler.sample(8, |i| WEIGHTS[i], |_| 0.0, Some(0), &stream);
            assert_eq!(sample.len(), 3);
            let forced: Vec<_> = sample.items.iter().filter(|item| item.forced).collect();
            assert_eq!(forced.len(), 1);
            assert_eq!(forced[0].index, 0);
            assert!((forced[0].inclusion_probability - 2.0 / 28.0).abs() < 1e-12);
            // The member drawn with certainty is never replaced.
            assert!(sample.contains(7));
        }
    }

    #[test]
    fn ineligible_forced_member_test() {
        let sampler = AlternativeSampler::new(SamplerSettings {
            sample_size: 3,
            strata: Vec::new(),
            max_distance: Some(10.0),
        })
        .unwrap();
        let stream = RandomStream::new(9);
        // Member 6 is too far.
        let distance = |i: usize| if i == 6 { 50.0 } else { 1.0 };
        let sample = sampler.sample(8, |i| WEIGHTS[i], distance, Some(6), &stream);
        assert_eq!(sample.len(), 3);
        let item = sample.items.iter().find(|item| item.index == 6).unwrap();
        assert!(item.forced);
        assert!(!item.eligible);
        assert_eq!(item.adjustment, 0.0);
    }

    #[test]
    fn strata_test() {
        let sampler = sampler(
            4,
            vec![StratumBand {
                max_distance: 5.0,
                share: 0.5,
            }],
        );
        let mut stream = RandomStream::new(3);
        let distance = |i: usize| i as f64;
        let weights = [1.0; 20];
        for run in 0..100 {
            stream.reset(run, 0);
            let sample = sampler.sample(20, |i| weights[i], distance, None, &stream);
            let near = sample.items.iter().filter(|item| item.index <= 5).count();
            assert_eq!(near, 2);
            assert_eq!(sample.len(), 4);
            for item in sample.items.iter() {
                let expected = if item.index <= 5 { 2.0 / 6.0 } else { 2.0 / 14.0 };
                assert!((item.inclusion_probability - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn settings_from_json_test() {
        let settings: SamplerSettings = serde_json::from_str(
            r#"{"sample_size": 30, "strata": [{"max_distance": 2.0, "share": 0.3}]}"#,
        )
        .unwrap();
        assert_eq!(settings.sample_size, 30);
        assert_eq!(settings.max_distance, None);
        assert_eq!(settings.shares(), vec![0.3, 0.7]);
        assert_eq!(settings.stratum_of(2.0), 0);
        assert_eq!(settings.stratum_of(2.5), 1);
        assert!(
            serde_json::from_str::<SamplerSettings>(r#"{"sample_size": 3, "size": 2}"#).is_err()
        );
    }

    #[test]
    fn register_alternatives_test() {
        let table = CoefficientTable::new(
            "location",
            "",
            vec![
                Coefficient::new(1, "sampling_adjustment", "T", 1.0),
                Coefficient::new(2, "dist", "F", -0.1),
            ],
        )
        .unwrap();
        let mut calc = ChoiceProbabilityCalculator::new("location", Arc::new(table), true);
        calc.start_occasion(OccasionKey::new(8, 0));
        let sampler = sampler(3, Vec::new());
        let stream = RandomStream::new(2);
        let sample = sampler.sample(8, |i| WEIGHTS[i], |i| i as f64, Some(2), &stream);
        sample
            .register_alternatives(&mut calc, 1, |item, alt| {
                alt.set_payload(ChoicePayload::Parcel {
                    parcel_id: item.index as u64,
                    zone_id: 0,
                })
                .add_utility_term(2, item.index as f64);
                Ok(())
            })
            .unwrap();
        assert_eq!(calc.nb_alternatives(), 3);
        for (position, item) in sample.items.iter().enumerate() {
            let expected = item.adjustment - 0.1 * item.index as f64;
            assert!((calc.alternative_utility(position).unwrap() - expected).abs() < 1e-12);
        }
        let observation = calc.write_observation().unwrap();
        assert_eq!(
            observation.alternatives[observation.chosen_index].payload,
            ChoicePayload::Parcel {
                parcel_id: 2,
                zone_id: 0
            }
        );
    }
}
