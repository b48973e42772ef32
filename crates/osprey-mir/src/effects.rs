//! Compile-time effect handler resolution.
//!
//! `handle E ... in body` pushes a [`HandlerFrame`] for the duration of
//! `body`. A `perform E.op(args)` is resolved against the stack innermost
//! first and lowered as an inline copy of the matching arm. The arm runs in
//! the environment captured when its frame was pushed, with only the frames
//! outside it still visible. Nothing is resumed and no continuation exists
//! at run time.

use osprey_hir::HirHandlerArm;

/// One `handle` block. `E` is the lexical environment captured at push time.
#[derive(Debug, Clone)]
pub struct HandlerFrame<'a, E> {
    pub effect: &'a str,
    pub arms: &'a [HirHandlerArm],
    pub env: E,
}

impl<'a, E> HandlerFrame<'a, E> {
    pub fn arm(&self, operation: &str) -> Option<&'a HirHandlerArm> {
        self.arms.iter().find(|a| a.operation == operation)
    }
}

/// A resolved `perform`: the depth of the handling frame and its arm.
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    pub depth: usize,
    pub arm: &'a HirHandlerArm,
}

#[derive(Debug, Clone)]
pub struct HandlerStack<'a, E> {
    frames: Vec<HandlerFrame<'a, E>>,
}

impl<E> Default for HandlerStack<'_, E> {
    fn default() -> Self {
        Self { frames: Vec::new() }
    }
}

impl<'a, E> HandlerStack<'a, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, frame: HandlerFrame<'a, E>) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<HandlerFrame<'a, E>> {
        self.frames.pop()
    }

    pub fn frame(&self, depth: usize) -> Option<&HandlerFrame<'a, E>> {
        self.frames.get(depth)
    }

    /// Innermost frame handling `effect.operation`.
    pub fn resolve(&self, effect: &str, operation: &str) -> Option<Resolution<'a>> {
        self.frames
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, frame)| frame.effect == effect)
            .find_map(|(depth, frame)| frame.arm(operation).map(|arm| Resolution { depth, arm }))
    }

    /// Remove the frame at `depth` and everything inside it.
    ///
    /// Hand the result back to [`HandlerStack::restore`] once the arm body
    /// has been lowered.
    pub fn hide_from(&mut self, depth: usize) -> Vec<HandlerFrame<'a, E>> {
        self.frames.split_off(depth.min(self.frames.len()))
    }

    pub fn restore(&mut self, hidden: Vec<HandlerFrame<'a, E>>) {
        self.frames.extend(hidden);
    }
}

#[cfg(test)]
mod tests {
    use osprey_hir::{HirExpr, HirExprKind, Lit, Span};
    use osprey_types::Type;

    use super::*;

    fn arm(operation: &str, value: i64) -> HirHandlerArm {
        HirHandlerArm {
            operation: operation.into(),
            params: vec![],
            body: HirExpr::new(HirExprKind::Lit(Lit::Int(value)), Type::int(), Span::synthetic()),
        }
    }

    fn body_value(arm: &HirHandlerArm) -> Option<i64> {
        match arm.body.kind {
            HirExprKind::Lit(Lit::Int(v)) => Some(v),
            _ => None,
        }
    }

    #[test]
    fn innermost_frame_wins() {
        let outer = [arm("log", 1)];
        let inner = [arm("log", 2)];
        let mut stack: HandlerStack<'_, ()> = HandlerStack::new();
        stack.push(HandlerFrame {
            effect: "Logger",
            arms: &outer,
            env: (),
        });
        stack.push(HandlerFrame {
            effect: "Logger",
            arms: &inner,
            env: (),
        });
        let found = stack.resolve("Logger", "log").expect("handled");
        assert_eq!(found.depth, 1);
        assert_eq!(body_value(found.arm), Some(2));
    }

    #[test]
    fn hidden_frames_expose_the_next_handler() {
        let outer = [arm("log", 1)];
        let inner = [arm("log", 2)];
        let mut stack: HandlerStack<'_, ()> = HandlerStack::new();
        stack.push(HandlerFrame {
            effect: "Logger",
            arms: &outer,
            env: (),
        });
        stack.push(HandlerFrame {
            effect: "Logger",
            arms: &inner,
            env: (),
        });

        let hidden = stack.hide_from(1);
        let found = stack.resolve("Logger", "log").expect("outer still visible");
        assert_eq!(body_value(found.arm), Some(1));
        stack.restore(hidden);
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn unrelated_effects_do_not_resolve() {
        let arms = [arm("get", 0)];
        let mut stack: HandlerStack<'_, ()> = HandlerStack::new();
        assert!(stack.resolve("State", "get").is_none());
        stack.push(HandlerFrame {
            effect: "State",
            arms: &arms,
            env: (),
        });
        assert!(stack.resolve("State", "put").is_none());
        assert!(stack.resolve("Logger", "get").is_none());
        assert!(stack.pop().is_some());
        assert!(stack.is_empty());
    }
}
