// #[module] proc-macro implementation
//
// Generates the loadable entry point of a bridged module.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::meta::ParseNestedMeta;
use syn::{Expr, ExprLit, ItemFn, Lit, LitStr, Meta, Result};

/// Arguments accepted by `#[module(...)]`
#[derive(Default)]
pub struct ModuleArgs {
    name: Option<LitStr>,
}

impl ModuleArgs {
    pub fn parse(&mut self, meta: ParseNestedMeta) -> Result<()> {
        if meta.path.is_ident("name") {
            self.name = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("unsupported #[module] argument, expected `name = \"...\"`"))
        }
    }
}

/// Expands the #[module] attribute macro.
///
/// Example expansion:
/// ```ignore
/// // Input:
/// /// Simulation helpers
/// #[module]
/// fn sim(m: &mut ModuleBuilder) -> BridgeResult<()> {
///     m.add_function("add", |a: i64, b: i64| a + b);
///     Ok(())
/// }
///
/// // Output:
/// /// Simulation helpers
/// fn sim(m: &mut ModuleBuilder) -> BridgeResult<()> {
///     m.add_function("add", |a: i64, b: i64| a + b);
///     Ok(())
/// }
///
/// #[no_mangle]
/// pub extern "C" fn hostlink_init_sim() -> ::hostlink::sdk::RawRef {
///     ::hostlink::init_module("sim", Some("Simulation helpers"), sim)
/// }
/// ```
pub fn expand_module(args: ModuleArgs, func: ItemFn) -> Result<TokenStream> {
    let sig = &func.sig;

    if sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            sig.asyncness,
            "Module init function must not be async",
        ));
    }

    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "Module init function must not be generic",
        ));
    }

    if sig.inputs.len() != 1 {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            "Module init function must take exactly one `&mut ModuleBuilder` parameter",
        ));
    }

    if matches!(sig.output, syn::ReturnType::Default) {
        return Err(syn::Error::new_spanned(
            sig,
            "Module init function must return BridgeResult<()>",
        ));
    }

    let ident = &sig.ident;
    let (module_name, name_span) = match &args.name {
        Some(lit) => (lit.value(), lit.span()),
        None => (ident.to_string(), ident.span()),
    };
    if !is_symbol_safe(&module_name) {
        return Err(syn::Error::new(
            name_span,
            format!("module name '{module_name}' must be a valid identifier"),
        ));
    }

    let entry = format_ident!("hostlink_init_{}", module_name);
    let doc = match module_doc(&func) {
        Some(doc) => quote! { ::core::option::Option::Some(#doc) },
        None => quote! { ::core::option::Option::None },
    };

    Ok(quote! {
        #func

        /// Entry point called by the host loader when the module is imported.
        #[no_mangle]
        pub extern "C" fn #entry() -> ::hostlink::sdk::RawRef {
            ::hostlink::init_module(#module_name, #doc, #ident)
        }
    })
}

fn is_symbol_safe(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Joined `///` comments of the init function
fn module_doc(func: &ItemFn) -> Option<String> {
    let lines: Vec<String> = func
        .attrs
        .iter()
        .filter(|attr| attr.path().is_ident("doc"))
        .filter_map(|attr| match &attr.meta {
            Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(text),
                    ..
                }) => Some(text.value().trim().to_string()),
                _ => None,
            },
            _ => None,
        })
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn expand(args: ModuleArgs, func: ItemFn) -> Result<String> {
        expand_module(args, func).map(|tokens| tokens.to_string())
    }

    #[test]
    fn test_generates_entry_point() {
        let func: ItemFn = parse_quote! {
            /// Simulation helpers
            fn sim(m: &mut ModuleBuilder) -> BridgeResult<()> {
                Ok(())
            }
        };
        let output = expand(ModuleArgs::default(), func).unwrap();
        assert!(output.contains("hostlink_init_sim"));
        assert!(output.contains("no_mangle"));
        assert!(output.contains("\"Simulation helpers\""));
        assert!(output.contains("init_module"));
        assert!(output.contains("\"sim\""));
    }

    #[test]
    fn test_name_override() {
        let func: ItemFn = parse_quote! {
            fn init(m: &mut ModuleBuilder) -> BridgeResult<()> {
                Ok(())
            }
        };
        let args = ModuleArgs {
            name: Some(parse_quote!("physics")),
        };
        let output = expand(args, func).unwrap();
        assert!(output.contains("hostlink_init_physics"));
        assert!(output.contains("\"physics\""));
        assert!(output.contains("None"));
    }

    #[test]
    fn test_rejects_bad_signatures() {
        let no_params: ItemFn = parse_quote! {
            fn sim() -> BridgeResult<()> { Ok(()) }
        };
        assert!(expand(ModuleArgs::default(), no_params).is_err());

        let no_return: ItemFn = parse_quote! {
            fn sim(m: &mut ModuleBuilder) {}
        };
        assert!(expand(ModuleArgs::default(), no_return).is_err());

        let generic: ItemFn = parse_quote! {
            fn sim<T>(m: &mut ModuleBuilder) -> BridgeResult<()> { Ok(()) }
        };
        assert!(expand(ModuleArgs::default(), generic).is_err());
    }

    #[test]
    fn test_rejects_unsafe_symbol_names() {
        let func: ItemFn = parse_quote! {
            fn init(m: &mut ModuleBuilder) -> BridgeResult<()> { Ok(()) }
        };
        let args = ModuleArgs {
            name: Some(parse_quote!("my-module")),
        };
        assert!(expand(args, func).is_err());
    }
}
