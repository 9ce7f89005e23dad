#![forbid(unsafe_code)]

use proc_macro_error::{abort_if_dirty, emit_error, proc_macro_error};
use quote::quote;
use syn::punctuated::Punctuated;
use syn::{Attribute, Meta, MetaList, Token};
use synstructure::{decl_derive, AddBounds, Structure};

const IGNORE: &str = "ignore";

decl_derive!([Trace, attributes(cyclic_rc)] => #[proc_macro_error] derive_trace_trait);

fn derive_trace_trait(mut s: Structure<'_>) -> proc_macro2::TokenStream {
    // Skip every field annotated with #[cyclic_rc(ignore)]
    s.filter(|bi| {
        !bi.ast().attrs
        .iter()
        .any(|attr| attr_contains(attr, IGNORE))
    });

    // Abort if errors have been emitted while inspecting the attributes
    abort_if_dirty();

    // Identifier for the ctx parameter of Trace::trace(...)
    // Shouldn't clash with any other identifier
    let ctx = quote::format_ident!("__cyclic_rc__Trace__ctx__");

    let body = s.each(|bi| {
        let ty = &bi.ast().ty;
        quote! {
            <#ty as cyclic_rc::Trace>::trace(#bi, #ctx);
        }
    });

    s.underscore_const(true);
    s.add_bounds(AddBounds::Fields);
    s.gen_impl(quote! {
        extern crate cyclic_rc;

        gen unsafe impl cyclic_rc::Trace for @Self {
            #[inline]
            #[allow(non_snake_case)]
            fn trace(&self, #ctx: &mut cyclic_rc::Context<'_>) {
                match *self { #body }
            }
        }
    })
}

fn get_meta_items(attr: &Attribute) -> Option<&MetaList> {
    if attr.path().is_ident("cyclic_rc") {
        match &attr.meta {
            Meta::List(meta) => Some(meta),
            err => {
                emit_error!(err, "Invalid attribute");
                None
            },
        }
    } else {
        None
    }
}

fn attr_contains(attr: &Attribute, ident: &str) -> bool {
    let Some(meta_list) = get_meta_items(attr) else {
        return false;
    };

    let nested = match meta_list.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated) {
        Ok(nested) => nested,
        Err(err) => {
            emit_error!(meta_list, "Invalid attribute: {}", err);
            return false;
        },
    };

    for meta in nested {
        match meta {
            Meta::Path(path) if path.is_ident(ident) => {
                return true;
            },
            Meta::Path(path) => {
                emit_error!(path, "Unrecognized attribute");
            },
            err => {
                emit_error!(err, "Invalid attribute");
            },
        }
    }

    false
}
