use quote::{quote, quote_spanned};
use syn::spanned::Spanned;
use syn::{parse_macro_input, parse_quote, Data, DeriveInput, Fields, Generics, Index};

/// Skips plain data and raw tensors, recurses into anything else and records
/// the matching where-bound.
macro_rules! match_type {
    ($F:ident, $Where:ident, $Ty:ident, module=$ModuleStmt:tt, bound=$Bound:path) => {
        match $Ty {
            syn::Type::Path(path) => {
                match path.path.segments[0].ident.to_string().as_str() {
                    "bool" => quote_spanned!($F.span() => ();),
                    "i8" | "i16" | "i32" | "i64" | "isize" => quote_spanned!($F.span() => ();),
                    "u8" | "u16" | "u32" | "u64" | "usize" => quote_spanned!($F.span() => ();),
                    "f32" | "f64" => quote_spanned!($F.span() => ();),
                    "Tensor" => quote_spanned!($F.span() => ();),
                    _ => {
                        $Where
                            .predicates
                            .push(parse_quote!(#$Ty: $Bound));
                        quote_spanned!($F.span() => $ModuleStmt;)
                    }
                }
            }
            _ => {
                $Where
                    .predicates
                    .push(parse_quote!(#$Ty: $Bound));
                quote_spanned!($F.span() => $ModuleStmt;)
            }
        }
    };
}

/// Adds `E: Dtype` and `D: Device<E>` unless the type already declares them.
fn with_device_generics(generics: &Generics) -> Generics {
    let mut custom_generics = generics.clone();
    let has_param = |generics: &Generics, name: &str| {
        generics.params.iter().any(|param| match param {
            syn::GenericParam::Type(type_param) => type_param.ident == name,
            _ => false,
        })
    };
    if !has_param(&custom_generics, "E") {
        custom_generics
            .params
            .push(parse_quote!(E: dfdx::prelude::Dtype));
    }
    if !has_param(&custom_generics, "D") {
        custom_generics
            .params
            .push(parse_quote!(D: dfdx::prelude::Device<E>));
    }
    custom_generics
}

/// Implements `crate::ResetParams<E, D>` for a composite module by resetting
/// every sub-module field in declaration order.
///
/// Leaf modules that own tensors implement `ResetParams` by hand, since only
/// they know how their parameters are initialised.
#[proc_macro_derive(ResetParams)]
pub fn reset_params(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let mut input = parse_macro_input!(input as DeriveInput);

    let name = input.ident;
    let custom_generics = with_device_generics(&input.generics);

    let where_clause = input.generics.make_where_clause();
    let resets = match &input.data {
        Data::Struct(ref obj) => match obj.fields {
            Fields::Named(ref fields) => {
                let resets = fields.named.iter().map(|f| {
                    let name = &f.ident;
                    let ty = &f.ty;
                    match_type!(
                        f, where_clause, ty,
                        module={self.#name.try_reset_params()?},
                        bound=crate::ResetParams<E, D>
                    )
                });
                quote! { #(#resets)* }
            }
            Fields::Unnamed(ref fields) => {
                let resets = fields.unnamed.iter().enumerate().map(|(i, f)| {
                    let index = Index::from(i);
                    let ty = &f.ty;
                    match_type!(
                        f, where_clause, ty,
                        module={self.#index.try_reset_params()?},
                        bound=crate::ResetParams<E, D>
                    )
                });
                quote! { #(#resets)* }
            }
            Fields::Unit => Default::default(),
        },
        Data::Enum(_) => unimplemented!("ResetParams not implemented for enums."),
        Data::Union(_) => unimplemented!("ResetParams not implemented for unions."),
    };

    let (impl_generics, _, _) = custom_generics.split_for_impl();
    let (_, ty_generics, where_clause) = input.generics.split_for_impl();

    proc_macro::TokenStream::from(quote! {
        impl #impl_generics crate::ResetParams<E, D> for #name #ty_generics #where_clause {
            fn try_reset_params(&mut self) -> Result<(), D::Err> {
                #resets
                Ok(())
            }
        }
    })
}
