//! Transform engine seam and the default operator registry.
//!
//! The replay core treats the engine as a black box: given a descriptor and an
//! input channel it returns an output channel. [`OperatorRegistry`] is a small
//! engine that folds the descriptor's operator chain over named operators. Its
//! built-ins are stream plumbing only (`identity`, `take`, `skip`, `dedupe`,
//! `sample`, `merge`); analytic operators are registered by callers.

use std::{collections::HashMap, future, rc::Rc, str::FromStr, task::Poll};

use futures::{stream, StreamExt};

use crate::{
    binder::ReplayContext,
    channel::{self, poll_now, Sender, Source},
    clock::{TaskResult, Time, VirtualClock, LOWEST_PRIORITY},
    descriptor::Descriptor,
    ReplayError,
};

/// Applies a descriptor's semantics to a channel.
pub trait TransformEngine<T> {
    fn transform(
        &self,
        descriptor: &Descriptor,
        input: Source<T>,
        ctx: &ReplayContext<T>,
    ) -> Result<Source<T>, ReplayError>;
}

impl<T, F> TransformEngine<T> for F
where
    F: Fn(&Descriptor, Source<T>, &ReplayContext<T>) -> Result<Source<T>, ReplayError>,
{
    fn transform(
        &self,
        descriptor: &Descriptor,
        input: Source<T>,
        ctx: &ReplayContext<T>,
    ) -> Result<Source<T>, ReplayError> {
        self(descriptor, input, ctx)
    }
}

/// A named operator: input channel, call arguments and context to output channel.
pub type Operator<T> =
    Rc<dyn Fn(Source<T>, &[String], &ReplayContext<T>) -> Result<Source<T>, ReplayError>>;

/// Engine resolving operator calls by name.
pub struct OperatorRegistry<T> {
    operators: HashMap<String, Operator<T>>,
}

impl<T: 'static> OperatorRegistry<T> {
    /// A registry with no operators; only bare patterns can be bound.
    pub fn empty() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, op: F) -> &mut Self
    where
        F: Fn(Source<T>, &[String], &ReplayContext<T>) -> Result<Source<T>, ReplayError> + 'static,
    {
        self.operators.insert(name.into(), Rc::new(op));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }
}

impl<T: Clone + PartialEq + 'static> OperatorRegistry<T> {
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry
            .register("identity", |input, args, _| {
                arity("identity", args, 0)?;
                Ok(input)
            })
            .register("take", |input, args, _| {
                arity("take", args, 1)?;
                let n: usize = required_arg("take", args, 0)?;
                Ok(input.take(n).boxed_local())
            })
            .register("skip", |input, args, _| {
                arity("skip", args, 1)?;
                let n: usize = required_arg("skip", args, 0)?;
                Ok(input.skip(n).boxed_local())
            })
            .register("dedupe", |input, args, _| {
                arity("dedupe", args, 0)?;
                Ok(dedupe(input))
            })
            .register("sample", |input, args, ctx| {
                arity("sample", args, 1)?;
                let period = match optional_arg::<Time>("sample", args, 0)? {
                    Some(period) => period,
                    None => ctx.period().ok_or_else(|| invalid(
                        "sample",
                        "no period given and no default period configured",
                    ))?,
                };
                if period == 0 {
                    return Err(invalid("sample", "period must be positive"));
                }
                Ok(sample(input, period, ctx.clock()))
            })
            .register("merge", |input, args, ctx| {
                arity("merge", args, 1)?;
                let pattern: String = required_arg("merge", args, 0)?;
                let other = ctx.generate(&pattern)?;
                Ok(stream::select(input, other).boxed_local())
            });
        registry
    }
}

impl<T: Clone + PartialEq + 'static> Default for OperatorRegistry<T> {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl<T: 'static> TransformEngine<T> for OperatorRegistry<T> {
    fn transform(
        &self,
        descriptor: &Descriptor,
        input: Source<T>,
        ctx: &ReplayContext<T>,
    ) -> Result<Source<T>, ReplayError> {
        descriptor.ops().iter().try_fold(input, |source, call| {
            let op = self
                .operators
                .get(&call.name)
                .ok_or_else(|| ReplayError::UnknownOperator(call.name.clone()))?;
            tracing::trace!(op = %call, pattern = descriptor.pattern(), "Applying operator");
            op(source, call.args.as_slice(), ctx)
        })
    }
}

fn invalid(op: &str, reason: impl Into<String>) -> ReplayError {
    ReplayError::InvalidArguments {
        op: op.to_owned(),
        reason: reason.into(),
    }
}

fn arity(op: &str, args: &[String], max: usize) -> Result<(), ReplayError> {
    if args.len() > max {
        return Err(invalid(
            op,
            format!("expected at most {max} argument(s), got {}", args.len()),
        ));
    }
    Ok(())
}

fn optional_arg<N: FromStr>(op: &str, args: &[String], idx: usize) -> Result<Option<N>, ReplayError> {
    args.get(idx)
        .map(|raw| {
            raw.parse::<N>()
                .map_err(|_| invalid(op, format!("cannot parse argument {raw:?}")))
        })
        .transpose()
}

fn required_arg<N: FromStr>(op: &str, args: &[String], idx: usize) -> Result<N, ReplayError> {
    optional_arg(op, args, idx)?
        .ok_or_else(|| invalid(op, format!("missing argument #{}", idx + 1)))
}

fn dedupe<T: Clone + PartialEq + 'static>(input: Source<T>) -> Source<T> {
    let mut last: Option<T> = None;
    input
        .filter_map(move |value| {
            let fresh = last.as_ref() != Some(&value);
            if fresh {
                last = Some(value.clone());
            }
            future::ready(fresh.then_some(value))
        })
        .boxed_local()
}

/// Emits the latest value seen during each `period`, on the shared clock.
fn sample<T: 'static>(input: Source<T>, period: Time, clock: &VirtualClock) -> Source<T> {
    let (target, output) = channel::channel();
    let sampler = Sampler {
        input,
        latest: None,
        target,
        period,
    };
    sampler.schedule(clock);
    output
}

struct Sampler<T> {
    input: Source<T>,
    latest: Option<T>,
    target: Sender<T>,
    period: Time,
}

impl<T: 'static> Sampler<T> {
    fn schedule(self, clock: &VirtualClock) {
        let at = clock.now().saturating_add(self.period);
        // Lowest priority so data delivered at the sampling instant is included.
        clock.invoke_at_with_priority(at, LOWEST_PRIORITY, move |clock| self.fire(clock));
    }

    fn fire(mut self, clock: &VirtualClock) -> TaskResult {
        let mut exhausted = false;
        loop {
            match poll_now(&mut self.input) {
                Poll::Ready(Some(value)) => self.latest = Some(value),
                Poll::Ready(None) => {
                    exhausted = true;
                    break;
                }
                Poll::Pending => break,
            }
        }
        if let Some(value) = self.latest.take() {
            self.target.enqueue(value);
        }
        if exhausted || self.target.is_closed() {
            tracing::trace!(now = clock.now(), "Sampler finished");
            self.target.close();
            return Ok(());
        }
        self.schedule(clock);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::from_iter,
        descriptor::{ChainParser, DescriptorParser},
        feeder::{sequence_source, PayloadFn, TimestampFn},
    };

    fn run(descriptor: &str, input: Vec<u32>) -> Result<Vec<u32>, ReplayError> {
        let ctx = ReplayContext::new(VirtualClock::new());
        let descriptor = ChainParser.parse(descriptor)?;
        let mut out = OperatorRegistry::with_builtins().transform(&descriptor, from_iter(input), &ctx)?;
        let mut values = Vec::new();
        while let Poll::Ready(Some(v)) = poll_now(&mut out) {
            values.push(v);
        }
        Ok(values)
    }

    #[test]
    fn test_plumbing_operators() {
        assert_eq!(run("x", vec![1, 2, 3]).unwrap(), vec![1, 2, 3]);
        assert_eq!(run("x.identity()", vec![1, 2]).unwrap(), vec![1, 2]);
        assert_eq!(run("x.skip(1).take(2)", vec![1, 2, 3, 4]).unwrap(), vec![2, 3]);
        assert_eq!(run("x.dedupe()", vec![1, 1, 2, 2, 1]).unwrap(), vec![1, 2, 1]);
    }

    #[test]
    fn test_operator_errors() {
        assert!(matches!(run("x.rate()", vec![]), Err(ReplayError::UnknownOperator(op)) if op == "rate"));
        assert!(matches!(
            run("x.take(many)", vec![]),
            Err(ReplayError::InvalidArguments { op, .. }) if op == "take"
        ));
        assert!(matches!(
            run("x.take()", vec![]),
            Err(ReplayError::InvalidArguments { .. })
        ));
        assert!(matches!(
            run("x.sample()", vec![]),
            Err(ReplayError::InvalidArguments { op, .. }) if op == "sample"
        ));
        assert!(matches!(
            run("x.sample(0)", vec![]),
            Err(ReplayError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_custom_operator() {
        let mut registry = OperatorRegistry::<u32>::empty();
        registry.register("double", |input, _, _| Ok(input.map(|v| v * 2).boxed_local()));
        assert!(registry.contains("double"));
        assert!(!registry.contains("take"));

        let ctx = ReplayContext::new(VirtualClock::new());
        let descriptor = ChainParser.parse("x.double()").unwrap();
        let mut out = registry.transform(&descriptor, from_iter(vec![4]), &ctx).unwrap();
        assert_eq!(poll_now(&mut out), Poll::Ready(Some(8)));
    }

    #[test]
    fn test_sample_uses_default_period_on_the_shared_clock() {
        let clock = VirtualClock::new();
        let ctx = ReplayContext::new(clock.clone()).with_period(Some(10));
        let ts: TimestampFn<(Time, u32)> = Rc::new(|e: &(Time, u32)| e.0);
        let value: PayloadFn<(Time, u32), u32> = Rc::new(|e: (Time, u32)| e.1);
        let input = sequence_source(&clock, vec![(2, 1), (7, 2), (10, 3), (25, 4)], ts, value);

        let descriptor = ChainParser.parse("x.sample()").unwrap();
        let mut out = OperatorRegistry::with_builtins()
            .transform(&descriptor, input, &ctx)
            .unwrap();

        let mut emitted = Vec::new();
        while clock.advance().unwrap() {
            while let Poll::Ready(Some(v)) = poll_now(&mut out) {
                emitted.push((clock.now(), v));
            }
        }
        // 3 arrives at t=10 and is included in the first window
        assert_eq!(emitted, vec![(10, 3), (30, 4)]);
        assert_eq!(poll_now(&mut out), Poll::Ready(None));
    }
}
