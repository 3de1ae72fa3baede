use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::spanned::Spanned;
use syn::{parse_macro_input, parse_quote, Data, DeriveInput, Field, Fields, GenericParam, Ident};

macro_rules! has_attr {
    ($F:expr, $Attr:expr) => {
        $F.attrs.iter().find(|a| a.path().is_ident($Attr)).is_some()
    };
}

/// The element type parameter of a module struct, e.g. `E` in `ResNet<E>`.
fn elem_param(input: &DeriveInput) -> syn::Result<Ident> {
    input
        .generics
        .params
        .iter()
        .find_map(|param| match param {
            GenericParam::Type(type_param) => Some(type_param.ident.clone()),
            _ => None,
        })
        .ok_or_else(|| {
            syn::Error::new(
                input.ident.span(),
                "expected a dtype type parameter, e.g. `struct Block<E>`",
            )
        })
}

fn named_fields(input: &DeriveInput) -> syn::Result<Vec<&Field>> {
    match &input.data {
        Data::Struct(obj) => match &obj.fields {
            Fields::Named(fields) => Ok(fields.named.iter().collect()),
            _ => Err(syn::Error::new(
                input.ident.span(),
                "only structs with named fields are supported",
            )),
        },
        _ => Err(syn::Error::new(
            input.ident.span(),
            "only structs with named fields are supported",
        )),
    }
}

/// Visits `fields` in declaration order, each under a location named after
/// the field.
fn impl_tensor_collection(input: &DeriveInput, elem: &Ident, fields: &[&Field]) -> TokenStream {
    let name = &input.ident;
    let mut generics = input.generics.clone();
    let where_clause = generics.make_where_clause();
    where_clause
        .predicates
        .push(parse_quote!(#elem: ::medfusion::dtypes::Dtype));

    let mut visits = Vec::with_capacity(fields.len());
    let mut visits_mut = Vec::with_capacity(fields.len());
    for field in fields {
        let ident = &field.ident;
        let ty = &field.ty;
        let key = ident.as_ref().map(|i| i.to_string());
        where_clause
            .predicates
            .push(parse_quote!(#ty: ::medfusion::nn_traits::TensorCollection<#elem>));
        visits.push(quote_spanned!(field.span()=>
            ::medfusion::nn_traits::TensorCollection::<#elem>::iter_tensors(
                &self.#ident,
                &::medfusion::nn_traits::join_location(location, #key),
                f,
            );
        ));
        visits_mut.push(quote_spanned!(field.span()=>
            ::medfusion::nn_traits::TensorCollection::<#elem>::try_iter_tensors_mut(
                &mut self.#ident,
                &::medfusion::nn_traits::join_location(location, #key),
                f,
            )?;
        ));
    }

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    quote! {
        impl #impl_generics ::medfusion::nn_traits::TensorCollection<#elem> for #name #ty_generics #where_clause {
            fn iter_tensors(
                &self,
                location: &str,
                f: &mut dyn FnMut(
                    &str,
                    ::medfusion::nn_traits::TensorOptions,
                    &::medfusion::tensor::Tensor<#elem>,
                ),
            ) {
                #(#visits)*
            }

            fn try_iter_tensors_mut(
                &mut self,
                location: &str,
                f: &mut dyn FnMut(
                    &str,
                    ::medfusion::nn_traits::TensorOptions,
                    &mut ::medfusion::tensor::Tensor<#elem>,
                ) -> ::core::result::Result<(), ::medfusion::tensor::Error>,
            ) -> ::core::result::Result<(), ::medfusion::tensor::Error> {
                #(#visits_mut)*
                Ok(())
            }
        }
    }
}

/// Implements `TensorCollection` for a module struct. Fields marked with
/// `#[module]` are visited in declaration order, each under a location named
/// after the field, so `layer1: Vec<ResBlock<E>>` stores its tensors as
/// `layer1.0.conv1.weight` and so on. Unmarked fields hold no tensors.
///
/// ```ignore
/// #[derive(Debug, Clone, TensorCollection)]
/// pub struct SqueezeExcitation<E> {
///     pub avgpool: AvgPoolGlobal,
///     #[module]
///     pub fc1: Conv2D<E>,
///     pub activation: SiLU,
///     #[module]
///     pub fc2: Conv2D<E>,
///     pub scale_activation: Sigmoid,
/// }
/// ```
#[proc_macro_derive(TensorCollection, attributes(module))]
pub fn tensor_collection(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let expanded = elem_param(&input).and_then(|elem| {
        let fields = named_fields(&input)?;
        let modules: Vec<&Field> = fields.into_iter().filter(|f| has_attr!(f, "module")).collect();
        Ok(impl_tensor_collection(&input, &elem, &modules))
    });
    proc_macro::TokenStream::from(expanded.unwrap_or_else(syn::Error::into_compile_error))
}

/// Implements `TensorCollection` over every field, and a `Module` that feeds a
/// tensor through every field in declaration order, in both inference and
/// training mode.
///
/// ```ignore
/// #[derive(Debug, Clone, Sequential)]
/// pub struct Transition<E> {
///     pub norm: BatchNorm2D<E>,
///     pub relu: ReLU,
///     pub conv: Conv2D<E>,
///     pub pool: AvgPool2D,
/// }
/// ```
#[proc_macro_derive(Sequential)]
pub fn sequential(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let expanded = elem_param(&input).and_then(|elem| {
        let fields = named_fields(&input)?;
        if fields.is_empty() {
            return Err(syn::Error::new(
                input.ident.span(),
                "a sequential module needs at least one field",
            ));
        }
        let collection = impl_tensor_collection(&input, &elem, &fields);

        let name = &input.ident;
        let mut generics = input.generics.clone();
        let where_clause = generics.make_where_clause();
        where_clause
            .predicates
            .push(parse_quote!(#elem: ::medfusion::dtypes::Dtype));
        let mut forwards = Vec::with_capacity(fields.len());
        let mut forwards_mut = Vec::with_capacity(fields.len());
        for field in &fields {
            let ident = &field.ident;
            let ty = &field.ty;
            where_clause.predicates.push(parse_quote!(
                #ty: ::medfusion::nn_traits::Module<
                    ::medfusion::tensor::Tensor<#elem>,
                    Output = ::medfusion::tensor::Tensor<#elem>,
                >
            ));
            forwards.push(quote_spanned!(field.span()=>
                let x = ::medfusion::nn_traits::Module::try_forward(&self.#ident, x)?;
            ));
            forwards_mut.push(quote_spanned!(field.span()=>
                let x = ::medfusion::nn_traits::Module::try_forward_mut(&mut self.#ident, x)?;
            ));
        }

        let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
        Ok(quote! {
            #collection

            impl #impl_generics ::medfusion::nn_traits::Module<::medfusion::tensor::Tensor<#elem>>
                for #name #ty_generics #where_clause
            {
                type Output = ::medfusion::tensor::Tensor<#elem>;

                fn try_forward(
                    &self,
                    x: ::medfusion::tensor::Tensor<#elem>,
                ) -> ::core::result::Result<Self::Output, ::medfusion::tensor::Error> {
                    #(#forwards)*
                    Ok(x)
                }

                fn try_forward_mut(
                    &mut self,
                    x: ::medfusion::tensor::Tensor<#elem>,
                ) -> ::core::result::Result<Self::Output, ::medfusion::tensor::Error> {
                    #(#forwards_mut)*
                    Ok(x)
                }
            }
        })
    });
    proc_macro::TokenStream::from(expanded.unwrap_or_else(syn::Error::into_compile_error))
}
