// stream.rs — The opaque stream contract consumed by the optimizer
//
// A `Stream` couples a declared usage bound and effect tag with a state-step
// transform `run(input, state) -> (new_state, outputs)`. The optimizer reads
// only the declared metadata; transforms are composed when two stages fuse and
// are never invoked during analysis.
//
// Preconditions: none.
// Postconditions: `Transform::then` yields a transform equivalent to running
//                 the first stage and feeding each output to the second.
// Failure modes: none.
// Side effects: none (bodies supplied by callers may have their own).

use std::fmt;
use std::sync::Arc;

use serde_json::json;

use crate::effect::EffectTag;
use crate::multiplicity::Multiplicity;

/// Element and state type flowing through transforms.
pub type Datum = serde_json::Value;

type StepFn = dyn Fn(&Datum, Datum) -> (Datum, Vec<Datum>) + Send + Sync;

/// A state-step function plus its initial state. Cloning shares the body.
#[derive(Clone)]
pub struct Transform {
    step: Arc<StepFn>,
    initial: Datum,
}

impl Transform {
    pub fn new<F>(initial: Datum, step: F) -> Self
    where
        F: Fn(&Datum, Datum) -> (Datum, Vec<Datum>) + Send + Sync + 'static,
    {
        Transform {
            step: Arc::new(step),
            initial,
        }
    }

    /// A transform that ignores its state.
    pub fn stateless<F>(f: F) -> Self
    where
        F: Fn(&Datum) -> Vec<Datum> + Send + Sync + 'static,
    {
        Transform::new(Datum::Null, move |input, state| (state, f(input)))
    }

    /// Emits every input unchanged.
    pub fn identity() -> Self {
        Transform::stateless(|input| vec![input.clone()])
    }

    pub fn initial_state(&self) -> &Datum {
        &self.initial
    }

    /// Advance one input.
    pub fn run(&self, input: &Datum, state: Datum) -> (Datum, Vec<Datum>) {
        (self.step)(input, state)
    }

    /// Run a whole input sequence from the initial state, collecting outputs.
    pub fn run_all<'a, I>(&self, inputs: I) -> Vec<Datum>
    where
        I: IntoIterator<Item = &'a Datum>,
    {
        let mut state = self.initial.clone();
        let mut outputs = Vec::new();
        for input in inputs {
            let (next, mut emitted) = self.run(input, state);
            state = next;
            outputs.append(&mut emitted);
        }
        outputs
    }

    /// Sequential composition: `self` first, every output fed to `next`.
    ///
    /// The composite state is the pair `[self_state, next_state]`.
    pub fn then(&self, next: &Transform) -> Transform {
        let first = self.clone();
        let second = next.clone();
        let initial = json!([first.initial.clone(), second.initial.clone()]);
        Transform::new(initial, move |input, state| {
            let (first_state, mut second_state) = split_pair(state, &first, &second);
            let (first_state, mids) = first.run(input, first_state);
            let mut outputs = Vec::new();
            for mid in &mids {
                let (next_state, mut emitted) = second.run(mid, second_state);
                second_state = next_state;
                outputs.append(&mut emitted);
            }
            (Datum::Array(vec![first_state, second_state]), outputs)
        })
    }
}

/// Unpack a composite state; a malformed state restarts both halves.
fn split_pair(state: Datum, first: &Transform, second: &Transform) -> (Datum, Datum) {
    match state {
        Datum::Array(mut pair) if pair.len() == 2 => {
            let second_state = pair.pop().unwrap_or(Datum::Null);
            let first_state = pair.pop().unwrap_or(Datum::Null);
            (first_state, second_state)
        }
        _ => (first.initial.clone(), second.initial.clone()),
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("initial", &self.initial)
            .finish_non_exhaustive()
    }
}

/// A stage as supplied by the operator layer: declared metadata plus body.
#[derive(Debug, Clone)]
pub struct Stream {
    pub bound: Multiplicity,
    pub effect: EffectTag,
    pub transform: Transform,
}

impl Stream {
    pub fn new(bound: Multiplicity, effect: EffectTag, transform: Transform) -> Self {
        Stream {
            bound,
            effect,
            transform,
        }
    }

    /// Metadata only, identity body. Used where bodies are irrelevant.
    pub fn opaque(bound: Multiplicity, effect: EffectTag) -> Self {
        Stream::new(bound, effect, Transform::identity())
    }

    pub fn usage_bound(&self) -> Multiplicity {
        self.bound
    }

    pub fn effect_tag(&self) -> EffectTag {
        self.effect
    }

    pub fn run(&self, input: &Datum, state: Datum) -> (Datum, Vec<Datum>) {
        self.transform.run(input, state)
    }

    // ── Convenience bodies ──────────────────────────────────────────────

    /// One output per input, pure.
    pub fn map<F>(f: F) -> Self
    where
        F: Fn(&Datum) -> Datum + Send + Sync + 'static,
    {
        Stream::new(
            Multiplicity::ONE,
            EffectTag::Pure,
            Transform::stateless(move |x| vec![f(x)]),
        )
    }

    /// Zero or one output per input, pure.
    pub fn filter<F>(pred: F) -> Self
    where
        F: Fn(&Datum) -> bool + Send + Sync + 'static,
    {
        Stream::new(
            Multiplicity::ONE,
            EffectTag::Pure,
            Transform::stateless(move |x| if pred(x) { vec![x.clone()] } else { Vec::new() }),
        )
    }

    /// Any number of outputs per input; the caller declares bound and effect.
    pub fn flat_map<F>(bound: Multiplicity, effect: EffectTag, f: F) -> Self
    where
        F: Fn(&Datum) -> Vec<Datum> + Send + Sync + 'static,
    {
        Stream::new(bound, effect, Transform::stateless(f))
    }

    /// Running accumulation; emits the new accumulator for every input.
    pub fn scan<F>(initial: Datum, f: F) -> Self
    where
        F: Fn(&Datum, &Datum) -> Datum + Send + Sync + 'static,
    {
        Stream::new(
            Multiplicity::ONE,
            EffectTag::DeterministicEffect,
            Transform::new(initial, move |input, acc| {
                let next = f(&acc, input);
                (next.clone(), vec![next])
            }),
        )
    }
}
