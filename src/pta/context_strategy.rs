// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Context selectors offered to the host solver.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::ir::context::{Context, ContextCache, ContextElement, ContextId};
use crate::ir::program::{CallSiteId, MethodId};

pub trait ContextStrategy {
    type E: ContextElement;
    fn get_empty_context_id(&self) -> ContextId;
    fn get_context_by_id(&self, context_id: ContextId) -> Rc<Context<Self::E>>;
    /// The callee context of a call from `caller_ctx` through `callsite` to `callee`.
    fn select_call_context(&mut self, caller_ctx: ContextId, callsite: CallSiteId, callee: MethodId) -> ContextId;
    /// The heap context of an allocation inside a method analyzed under `method_ctx`.
    fn select_heap_context(&mut self, method_ctx: ContextId) -> ContextId;
}

/// Uniform k-call-site sensitivity.
pub struct KCallSiteSensitive {
    /// Context length limit for methods
    k: usize,
    heap_k: usize,
    pub(crate) ctx_cache: ContextCache<CallSiteId>,
}

impl KCallSiteSensitive {
    pub fn new(k: usize, heap_k: usize) -> Self {
        Self {
            k,
            heap_k,
            ctx_cache: ContextCache::new(),
        }
    }
}

fn append_call_site(cache: &mut ContextCache<CallSiteId>, caller_ctx: ContextId, callsite: CallSiteId, k: usize) -> ContextId {
    let caller = cache.get_context(caller_ctx).unwrap_or_else(Context::new_empty);
    let callee_ctx = Context::new_k_limited_context(&caller, callsite, k);
    cache.get_context_id(&callee_ctx)
}

fn last_k(cache: &mut ContextCache<CallSiteId>, ctx: ContextId, k: usize) -> ContextId {
    let context = cache.get_context(ctx).unwrap_or_else(Context::new_empty);
    let limited = Context::k_limited_context(&context, k);
    cache.get_context_id(&limited)
}

impl ContextStrategy for KCallSiteSensitive {
    type E = CallSiteId;

    fn get_empty_context_id(&self) -> ContextId {
        self.ctx_cache.empty_context_id()
    }

    fn get_context_by_id(&self, context_id: ContextId) -> Rc<Context<CallSiteId>> {
        self.ctx_cache.get_context(context_id).unwrap_or_else(Context::new_empty)
    }

    fn select_call_context(&mut self, caller_ctx: ContextId, callsite: CallSiteId, _callee: MethodId) -> ContextId {
        append_call_site(&mut self.ctx_cache, caller_ctx, callsite, self.k)
    }

    fn select_heap_context(&mut self, method_ctx: ContextId) -> ContextId {
        last_k(&mut self.ctx_cache, method_ctx, self.heap_k)
    }
}

/// How much call-site context a method gets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Precision {
    Min,
    Level(u8),
    Max,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::Min => f.write_str("MIN"),
            Precision::Max => f.write_str("MAX"),
            Precision::Level(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "MIN" => Ok(Precision::Min),
            "MAX" => Ok(Precision::Max),
            n => n
                .parse::<u8>()
                .map(Precision::Level)
                .map_err(|_| format!("invalid precision directive {}", s)),
        }
    }
}

/// Per-method precision directives.
pub type DirectiveTable = BTreeMap<MethodId, Precision>;

/// Call-site sensitivity whose depth is chosen per callee from a [`DirectiveTable`].
pub struct PrecisionSelector {
    directives: DirectiveTable,
    max_limit: usize,
    min_limit: usize,
    heap_limit: usize,
    pub(crate) ctx_cache: ContextCache<CallSiteId>,
}

impl PrecisionSelector {
    pub fn new(directives: DirectiveTable) -> Self {
        Self::with_limits(directives, 5, 1, 1)
    }

    pub fn with_limits(directives: DirectiveTable, max_limit: usize, min_limit: usize, heap_limit: usize) -> Self {
        PrecisionSelector {
            directives,
            max_limit,
            min_limit,
            heap_limit,
            ctx_cache: ContextCache::new(),
        }
    }

    pub fn directives(&self) -> &DirectiveTable {
        &self.directives
    }

    /// The call-site depth of `method`. Methods without a directive get the minimum.
    pub fn limit_of(&self, method: MethodId) -> usize {
        match self.directives.get(&method) {
            None | Some(Precision::Min) => self.min_limit,
            Some(Precision::Max) => self.max_limit,
            Some(Precision::Level(n)) => *n as usize,
        }
    }
}

impl ContextStrategy for PrecisionSelector {
    type E = CallSiteId;

    fn get_empty_context_id(&self) -> ContextId {
        self.ctx_cache.empty_context_id()
    }

    fn get_context_by_id(&self, context_id: ContextId) -> Rc<Context<CallSiteId>> {
        self.ctx_cache.get_context(context_id).unwrap_or_else(Context::new_empty)
    }

    fn select_call_context(&mut self, caller_ctx: ContextId, callsite: CallSiteId, callee: MethodId) -> ContextId {
        let limit = self.limit_of(callee);
        append_call_site(&mut self.ctx_cache, caller_ctx, callsite, limit)
    }

    fn select_heap_context(&mut self, method_ctx: ContextId) -> ContextId {
        last_k(&mut self.ctx_cache, method_ctx, self.heap_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(i: usize) -> MethodId {
        MethodId::new(i)
    }

    #[test]
    fn precision_text_form() {
        assert_eq!(Precision::Max.to_string(), "MAX");
        assert_eq!(Precision::Level(2).to_string(), "2");
        assert_eq!("MIN".parse::<Precision>(), Ok(Precision::Min));
        assert_eq!("3".parse::<Precision>(), Ok(Precision::Level(3)));
        assert!("deep".parse::<Precision>().is_err());
    }

    #[test]
    fn limits_follow_directives() {
        let mut directives = DirectiveTable::new();
        directives.insert(m(0), Precision::Max);
        directives.insert(m(1), Precision::Level(2));
        directives.insert(m(2), Precision::Min);
        let selector = PrecisionSelector::new(directives);
        assert_eq!(selector.limit_of(m(0)), 5);
        assert_eq!(selector.limit_of(m(1)), 2);
        assert_eq!(selector.limit_of(m(2)), 1);
        assert_eq!(selector.limit_of(m(3)), 1);
    }

    #[test]
    fn selected_contexts_are_limited_per_callee() {
        let mut directives = DirectiveTable::new();
        directives.insert(m(0), Precision::Max);
        let mut selector = PrecisionSelector::new(directives);
        let empty = selector.get_empty_context_id();

        let mut ctx = empty;
        for i in 0..7 {
            ctx = selector.select_call_context(ctx, CallSiteId::new(i), m(0));
        }
        assert_eq!(selector.get_context_by_id(ctx).len(), 5);

        let shallow = selector.select_call_context(ctx, CallSiteId::new(9), m(1));
        assert_eq!(selector.get_context_by_id(shallow).context_elems, vec![CallSiteId::new(9)]);

        let heap = selector.select_heap_context(ctx);
        assert_eq!(selector.get_context_by_id(heap).context_elems, vec![CallSiteId::new(6)]);
        assert_eq!(selector.select_heap_context(empty), empty);
    }

    #[test]
    fn uniform_k_call_site() {
        let mut strategy = KCallSiteSensitive::new(2, 1);
        let empty = strategy.get_empty_context_id();
        let c1 = strategy.select_call_context(empty, CallSiteId::new(1), m(0));
        let c2 = strategy.select_call_context(c1, CallSiteId::new(2), m(0));
        let c3 = strategy.select_call_context(c2, CallSiteId::new(3), m(0));
        assert_eq!(
            strategy.get_context_by_id(c3).context_elems,
            vec![CallSiteId::new(3), CallSiteId::new(2)]
        );
    }
}
