use std::cell::{Cell, RefCell};
use cyclic_rc::*;

struct ToTrace {
    has_been_traced: Cell<bool>,
}

unsafe impl Trace for ToTrace {
    fn trace(&self, _: &mut Context<'_>) {
        self.has_been_traced.set(true);
    }
}

impl ToTrace {
    fn new() -> Cc<ToTrace> {
        Cc::new(ToTrace {
            has_been_traced: Cell::new(false),
        })
    }
}

#[derive(Trace)]
enum MyEnum {
    A {
        cyclic: RefCell<Option<Cc<MyEnum>>>,
        traced: Cc<ToTrace>,
        #[cyclic_rc(ignore)]
        ignored: Cc<ToTrace>,
    },
}

fn main() {
    let my_enum = Cc::new(MyEnum::A {
        cyclic: RefCell::new(None),
        traced: ToTrace::new(),
        ignored: ToTrace::new(),
    });

    let MyEnum::A {
        cyclic,
        traced,
        ignored,
    } = &*my_enum;

    *cyclic.borrow_mut() = Some(my_enum.clone());

    // Drop an instance and collect so that my_enum is traced
    let _ = my_enum.clone();
    collect_cycles();

    assert!(traced.has_been_traced.get());
    assert!(!ignored.has_been_traced.get());
}
