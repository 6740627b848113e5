use crate::obj::func::NativeOutcome;
use crate::val::Value;

use super::*;

fn chain_with_spares(depth: usize, spares: usize) -> CallChain {
    let mut chain = CallChain::new(CallInfo::native(0, 0, 0));
    for i in 0..depth + spares {
        chain.push(CallInfo::native(i + 1, i + 2, 0));
    }
    for _ in 0..spares {
        chain.pop();
    }
    chain
}

#[test]
fn popped_nodes_are_reused() {
    let mut chain = CallChain::new(CallInfo::native(0, 0, 0));
    assert!(chain.push_allocates());
    chain.push(CallInfo::native(1, 5, 0));
    chain.push(CallInfo::native(2, 6, 0));
    assert_eq!(chain.allocated(), 3);
    chain.pop();
    chain.pop();
    assert!(!chain.push_allocates());
    chain.push(CallInfo::native(9, 12, 1));
    assert_eq!(chain.allocated(), 3);
    assert_eq!(chain.current().func, 9);
    assert_eq!(chain.at(2).map(|ci| ci.func), None);
}

#[test]
fn shrink_keeps_half_the_spares() {
    let mut chain = chain_with_spares(2, 7);
    assert_eq!(chain.allocated(), 10);
    chain.shrink();
    assert_eq!(chain.allocated(), 3 + 4);
    chain.shrink();
    assert_eq!(chain.allocated(), 3 + 2);
    chain.shrink();
    chain.shrink();
    assert_eq!(chain.allocated(), 3 + 1);
    assert_eq!(chain.depth(), 2);
    assert_eq!(chain.current().func, 2);
}

#[test]
fn free_spares_keeps_active_frames() {
    let mut chain = chain_with_spares(3, 5);
    chain.free_spares();
    assert_eq!(chain.allocated(), 4);
    assert!(chain.push_allocates());
    assert_eq!(chain.active().map(|ci| ci.func).collect::<Vec<_>>(), [0, 1, 2, 3]);
}

/// Calls itself `n` times, one native frame per level.
fn nest(rt: &mut Runtime, th: ThreadRef) -> Result<NativeOutcome, RuntimeError> {
    let n = rt.arg(th, 1).as_integer().unwrap_or(0);
    if n > 0 {
        let func = rt.stack_top(th);
        rt.push(th, Value::light_function(nest))?;
        rt.push(th, Value::integer(n - 1))?;
        rt.call(th, func, 0)?;
    }
    Ok(NativeOutcome::Return(0))
}

fn run_nest(rt: &mut Runtime, th: ThreadRef, n: i64) {
    let func = rt.stack_top(th);
    rt.push(th, Value::light_function(nest)).unwrap();
    rt.push(th, Value::integer(n)).unwrap();
    rt.call(th, func, 0).unwrap();
}

#[test]
fn frame_nodes_are_charged_reused_and_shrunk() {
    let mut rt = Runtime::new().unwrap();
    rt.gc_stop();
    let th = rt.main_thread();
    let before = rt.heap.charged(th);

    run_nest(&mut rt, th, 40);
    let deep = rt.thread(th).frames().allocated();
    assert_eq!(deep, 42);
    assert_eq!(rt.thread(th).frames().depth(), 0);
    let charged = rt.heap.charged(th);
    assert!(charged >= before + 41 * CallChain::NODE_SIZE);

    run_nest(&mut rt, th, 3);
    assert_eq!(rt.thread(th).frames().allocated(), deep);
    assert_eq!(rt.heap.charged(th), charged);

    rt.full_gc().unwrap();
    assert_eq!(rt.thread(th).frames().allocated(), 1 + 41usize.div_ceil(2));
    assert!(rt.heap.charged(th) < charged);
    assert_eq!(rt.allocator().in_use(), rt.total_bytes());
}
