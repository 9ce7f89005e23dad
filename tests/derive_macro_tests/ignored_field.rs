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

#[derive(Trace)]
struct MyStruct {
    cyclic: RefCell<Option<Cc<MyStruct>>>,
    #[cyclic_rc(ignore)]
    ignored: Cc<ToTrace>,
}

fn main() {
    let my_struct = Cc::new(MyStruct {
        cyclic: RefCell::new(None),
        ignored: Cc::new(ToTrace {
            has_been_traced: Cell::new(false),
        }),
    });

    *my_struct.cyclic.borrow_mut() = Some(my_struct.clone());

    // Drop an instance and collect so that my_struct is traced
    let _ = my_struct.clone();
    collect_cycles();

    assert!(!my_struct.ignored.has_been_traced.get());
}
