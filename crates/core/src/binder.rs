//! Wires queries to their input channels and applies transforms.
//!
//! Binding happens in two passes. [`plan`] parses every textual query first so a
//! malformed descriptor aborts the call before any channel is created or any
//! callback is scheduled. [`bind`] then resolves missing inputs through the
//! context's stream generator and runs the transform engine, producing one
//! output channel per key.

use std::rc::Rc;

use futures::StreamExt;

use crate::{
    channel::Source,
    clock::{Time, VirtualClock},
    descriptor::{Descriptor, DescriptorParser, DirectTransform, Query},
    operators::TransformEngine,
    ReplayError,
};

/// Resolves a source pattern into a clock-driven channel.
pub type Resolver<T> = Rc<dyn Fn(&str) -> Result<Source<T>, ReplayError>>;

/// Shared evaluation scope of one query invocation.
///
/// Every descriptor of an invocation is bound under the same context, and the
/// transform engine receives it by reference, so nested source lookups resolve
/// against the same generator, clock and period.
pub struct ReplayContext<T> {
    clock: VirtualClock,
    period: Option<Time>,
    resolver: Option<Resolver<T>>,
}

impl<T> Clone for ReplayContext<T> {
    fn clone(&self) -> Self {
        Self {
            clock: self.clock.clone(),
            period: self.period,
            resolver: self.resolver.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ReplayContext<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayContext")
            .field("clock", &self.clock)
            .field("period", &self.period)
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

impl<T> ReplayContext<T> {
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            clock,
            period: None,
            resolver: None,
        }
    }

    pub fn with_period(mut self, period: Option<Time>) -> Self {
        self.period = period;
        self
    }

    pub fn with_resolver(mut self, resolver: Option<Resolver<T>>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Default tick granularity for periodic operators.
    pub fn period(&self) -> Option<Time> {
        self.period
    }

    /// Requests the base stream for `pattern` from the stream generator.
    pub fn generate(&self, pattern: &str) -> Result<Source<T>, ReplayError> {
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| ReplayError::NoGenerator(pattern.to_owned()))?;
        tracing::debug!(pattern, "Generating base stream");
        resolver(pattern)
    }
}

/// What a key's input is handed to once resolved.
pub enum Target<T> {
    Parsed(Descriptor),
    Direct(DirectTransform<T>),
}

impl<T> Target<T> {
    /// Pattern used to generate the input when none was supplied.
    fn pattern<'a>(&'a self, key: &'a str) -> &'a str {
        match self {
            Target::Parsed(descriptor) => descriptor.pattern(),
            Target::Direct(_) => key,
        }
    }
}

/// A parsed query together with its (optional) explicit input.
pub struct Planned<T, C> {
    pub key: String,
    pub target: Target<T>,
    pub input: Option<C>,
}

impl<T, C> Planned<T, C> {
    /// Converts the explicit input, if any.
    pub fn map_input<D>(self, f: impl FnOnce(C) -> D) -> Planned<T, D> {
        Planned {
            key: self.key,
            target: self.target,
            input: self.input.map(f),
        }
    }
}

/// Parses every textual query; nothing is bound if any descriptor is malformed.
pub fn plan<T, C, I>(
    inputs: I,
    parser: &dyn DescriptorParser,
) -> Result<Vec<Planned<T, C>>, ReplayError>
where
    I: IntoIterator<Item = (Query<T>, Option<C>)>,
{
    inputs
        .into_iter()
        .map(|(query, input)| -> Result<Planned<T, C>, ReplayError> {
            let key = query.key().to_owned();
            let target = match query {
                Query::Text(text) => Target::Parsed(parser.parse(&text)?),
                Query::Direct { transform, .. } => Target::Direct(transform),
            };
            Ok(Planned { key, target, input })
        })
        .collect()
}

/// Resolves inputs and applies transforms, returning one fused output per key.
pub fn bind<T: 'static>(
    planned: Vec<Planned<T, Source<T>>>,
    ctx: &ReplayContext<T>,
    engine: &dyn TransformEngine<T>,
) -> Result<Vec<(String, Source<T>)>, ReplayError> {
    let mut outputs = Vec::with_capacity(planned.len());
    for Planned { key, target, input } in planned {
        let input = match input {
            Some(source) => source,
            None => ctx.generate(target.pattern(&key))?,
        };
        let output = match &target {
            Target::Parsed(descriptor) => engine.transform(descriptor, input, ctx)?,
            Target::Direct(transform) => {
                transform(input, ctx).map_err(|source| ReplayError::Transform {
                    key: key.clone(),
                    source,
                })?
            }
        };
        tracing::debug!(key = %key, "Bound output stream");
        outputs.push((key, output.fuse().boxed_local()));
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{from_iter, poll_now},
        descriptor::ChainParser,
        operators::OperatorRegistry,
    };
    use std::{cell::RefCell, task::Poll};

    fn drain(source: &mut Source<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Poll::Ready(Some(v)) = poll_now(source) {
            out.push(v);
        }
        out
    }

    #[test]
    fn test_malformed_descriptor_aborts_before_binding() {
        let inputs: Vec<(Query<u32>, Option<Source<u32>>)> = vec![
            (Query::text("a"), Some(from_iter(vec![1]))),
            (Query::text("b.take("), None),
        ];
        let err = plan(inputs, &ChainParser).err().unwrap();
        assert!(matches!(err, ReplayError::Parse(_)));
    }

    #[test]
    fn test_missing_input_uses_generator_with_pattern() {
        let requested = Rc::new(RefCell::new(Vec::new()));
        let seen = requested.clone();
        let resolver: Resolver<u32> = Rc::new(move |pattern: &str| -> Result<Source<u32>, ReplayError> {
            seen.borrow_mut().push(pattern.to_owned());
            Ok(from_iter(vec![7, 8, 9]))
        });
        let ctx = ReplayContext::new(VirtualClock::new()).with_resolver(Some(resolver));

        let planned = plan(
            vec![(Query::text("abc.take(2)"), None::<Source<u32>>)],
            &ChainParser,
        )
        .unwrap();
        let mut outputs = bind(planned, &ctx, &OperatorRegistry::with_builtins()).unwrap();

        assert_eq!(*requested.borrow(), vec!["abc".to_owned()]);
        assert_eq!(outputs[0].0, "abc.take(2)");
        assert_eq!(drain(&mut outputs[0].1), vec![7, 8]);
    }

    #[test]
    fn test_direct_transform_bypasses_parser() {
        let ctx = ReplayContext::new(VirtualClock::new());
        let query = Query::direct("doubled", |source: Source<u32>, _: &ReplayContext<u32>| {
            Ok(source.map(|v| v * 2).boxed_local())
        });
        let parser = |_: &str| -> Result<Descriptor, crate::descriptor::ParseError> {
            panic!("direct queries are never parsed")
        };
        let planned = plan(vec![(query, Some(from_iter(vec![1, 2])))], &parser).unwrap();
        let mut outputs = bind(planned, &ctx, &OperatorRegistry::with_builtins()).unwrap();
        assert_eq!(drain(&mut outputs[0].1), vec![2, 4]);
    }

    #[test]
    fn test_no_generator_is_an_error() {
        let ctx = ReplayContext::<u32>::new(VirtualClock::new());
        let planned = plan(vec![(Query::text("abc"), None::<Source<u32>>)], &ChainParser).unwrap();
        let err = bind(planned, &ctx, &OperatorRegistry::with_builtins()).err().unwrap();
        assert!(matches!(err, ReplayError::NoGenerator(p) if p == "abc"));
    }

    #[test]
    fn test_generator_failure_propagates() {
        let resolver: Resolver<u32> = Rc::new(|pattern: &str| -> Result<Source<u32>, ReplayError> {
            Err(ReplayError::Generator {
                pattern: pattern.to_owned(),
                source: anyhow::anyhow!("no such series"),
            })
        });
        let ctx = ReplayContext::new(VirtualClock::new()).with_resolver(Some(resolver));
        let planned = plan(vec![(Query::text("gone"), None::<Source<u32>>)], &ChainParser).unwrap();
        let err = bind(planned, &ctx, &OperatorRegistry::with_builtins()).err().unwrap();
        assert!(matches!(err, ReplayError::Generator { pattern, .. } if pattern == "gone"));
    }
}
