//! Hardware affinity selection.
//!
//! Pure and deterministic: the same machine affinity and candidate set always
//! choose the same Hardware. The selector runs on every pass until the
//! binding is recorded through the owner labels.

use crate::error::ControllerError;
use crds::{Hardware, HardwareAffinity, HardwareAffinityTerm};
use kube::core::{Selector, SelectorExt};
use kube::ResourceExt;
use std::cmp::Reverse;

fn selector(term: &HardwareAffinityTerm) -> Result<Selector, ControllerError> {
    Ok(Selector::try_from(term.label_selector.clone())?)
}

/// Chooses one unowned Hardware for a machine.
///
/// Required terms are OR'ed; with no required terms every unowned Hardware
/// qualifies. Each preferred term adds its weight to every qualifying
/// Hardware it matches. The highest score wins and ties go to the smallest
/// `(namespace, name)`.
pub fn select_hardware<'a>(
    affinity: Option<&HardwareAffinity>,
    candidates: &'a [Hardware],
) -> Result<&'a Hardware, ControllerError> {
    let required = affinity
        .map(|a| a.required.iter().map(selector).collect::<Result<Vec<_>, _>>())
        .transpose()?
        .unwrap_or_default();
    let preferred = affinity
        .map(|a| {
            a.preferred
                .iter()
                .map(|p| -> Result<(i64, Selector), ControllerError> {
                    Ok((i64::from(p.weight), selector(&p.hardware_affinity_term)?))
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();

    let mut scored: Vec<(i64, &Hardware)> = candidates
        .iter()
        .filter(|hw| hw.owner_name().is_none())
        .filter(|hw| required.is_empty() || required.iter().any(|s| s.matches(hw.labels())))
        .map(|hw| {
            let score = preferred
                .iter()
                .filter(|(_, s)| s.matches(hw.labels()))
                .map(|(weight, _)| weight)
                .sum();
            (score, hw)
        })
        .collect();

    scored.sort_by_key(|(score, hw)| (Reverse(*score), hw.namespace(), hw.name_any()));

    scored
        .first()
        .map(|(_, hw)| *hw)
        .ok_or_else(|| {
            ControllerError::NoHardwareAvailable(
                "no unowned hardware satisfies the required affinity terms".to_string(),
            )
        })
}
