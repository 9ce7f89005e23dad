use cyclic_rc::*;

#[derive(Trace)]
#[cyclic_rc()]
struct MyStruct {
    #[cyclic_rc()]
    a: (),
}

#[derive(Trace)]
#[cyclic_rc()]
enum MyEnum {
    #[cyclic_rc()]
    A(#[cyclic_rc()] i32),
    #[cyclic_rc()]
    B {
        #[cyclic_rc()]
        b: i32,
    },
}

fn main() {}
