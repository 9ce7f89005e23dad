use cyclic_rc::*;

#[derive(Trace)]
struct MyStruct {
    a: (),
}

#[derive(Trace)]
enum MyEnum {
    A(),
    B(),
}

fn main() {
    fn test<T: Trace>(_t: T) {}

    test(MyStruct { a: () });
    test(MyEnum::A());
    let _ = MyEnum::B();
}
