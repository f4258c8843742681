// hostlink-macros: attribute macros for hostlink bridges
//
// Provides:
// - #[module] - Turns a module init function into a loadable entry point
//
// Example:
// ```
// use hostlink::{BridgeResult, ModuleBuilder};
//
// #[hostlink::module]
// fn sim(m: &mut ModuleBuilder) -> BridgeResult<()> {
//     m.add_function("add", |a: i64, b: i64| a + b);
//     Ok(())
// }
// ```

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemFn};

mod module;

/// Defines the loadable entry point of a bridged module.
///
/// Must be applied to a function taking `&mut ModuleBuilder` and returning
/// `BridgeResult<()>`. The function is kept as is and an entry point
/// `hostlink_init_<name>()` is generated next to it. The entry point runs
/// the function on a fresh `ModuleBuilder`, publishes the module and
/// returns it as a new host reference, or null with the host error set.
///
/// The module name defaults to the function name and can be overridden
/// with `#[module(name = "...")]`. Doc comments on the function become the
/// module docstring.
///
/// # Example
///
/// ```ignore
/// use hostlink::{BridgeResult, ModuleBuilder};
///
/// /// Simulation helpers
/// #[hostlink::module]
/// fn sim(m: &mut ModuleBuilder) -> BridgeResult<()> {
///     m.add_function("version", || "1.0");
///     Ok(())
/// }
/// ```
///
/// This generates `hostlink_init_sim()`, which the host loader calls on
/// `import sim`.
#[proc_macro_attribute]
pub fn module(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = module::ModuleArgs::default();
    let parser = syn::meta::parser(|meta| args.parse(meta));
    parse_macro_input!(attr with parser);

    let input = parse_macro_input!(item as ItemFn);
    module::expand_module(args, input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
