use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitStr, Type};

/// Derive macro for a typed settings surface.
///
/// Generates two methods on the annotated struct:
///
/// - `declarations() -> Vec<SettingDecl>`: name, type, default and description of every setting.
/// - `from_values(&SettingValues) -> Result<Self, BrokerError>`: reads typed values,
///   falling back to `Default` for settings that were not given.
///
/// # Example
///
/// ```ignore
/// #[derive(Settings)]
/// pub struct MySettings {
///     #[setting(required, description = "Broker address")]
///     pub broker: String,
///
///     #[setting(description = "Poll timeout")]
///     pub poll_timeout_ms: Duration,
/// }
/// ```
///
/// Supported field types: `bool`, `u64`, `usize`, `String`, `Duration` (milliseconds).
#[proc_macro_derive(Settings, attributes(setting))]
pub fn derive_settings(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match derive_impl(&input) {
        Ok(tokens) => tokens,
        Err(e) => e.to_compile_error().into(),
    }
}

fn derive_impl(input: &DeriveInput) -> Result<TokenStream, syn::Error> {
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Settings only supports structs with named fields",
                ))
            }
        },
        _ => return Err(syn::Error::new_spanned(name, "Settings only supports structs")),
    };

    let mut decl_tokens = Vec::new();
    let mut read_tokens = Vec::new();

    for field in fields {
        let field_name = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected named field"))?;
        let field_name_str = field_name.to_string();
        let field_ty = &field.ty;

        let mut description_str: Option<String> = None;
        let mut required = false;

        for attr in &field.attrs {
            if !attr.path().is_ident("setting") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("description") {
                    let value: LitStr = meta.value()?.parse()?;
                    description_str = Some(value.value());
                    Ok(())
                } else if meta.path.is_ident("required") {
                    required = true;
                    Ok(())
                } else {
                    Err(meta.error("unknown setting attribute (expected 'description' or 'required')"))
                }
            })?;
        }

        let description_str = description_str.ok_or_else(|| {
            syn::Error::new_spanned(field_name, "missing #[setting(description = \"...\")]")
        })?;

        let ty_name = type_ident_name(field_ty)
            .ok_or_else(|| syn::Error::new_spanned(field_ty, "unsupported type for Settings"))?;

        // (declared type, default value expr, getter returning Option<field type>)
        let (type_expr, default_expr, getter_expr) = match ty_name.as_str() {
            "u64" => (
                quote! { xstream_api::settings::SettingType::U64 },
                quote! { xstream_api::settings::SettingValue::U64(__defaults.#field_name) },
                quote! { __values.get_u64(#field_name_str) },
            ),
            "usize" => (
                quote! { xstream_api::settings::SettingType::U64 },
                quote! { xstream_api::settings::SettingValue::U64(__defaults.#field_name as u64) },
                quote! { __values.get_u64(#field_name_str).map(|v| v as usize) },
            ),
            "bool" => (
                quote! { xstream_api::settings::SettingType::Bool },
                quote! { xstream_api::settings::SettingValue::Bool(__defaults.#field_name) },
                quote! { __values.get_bool(#field_name_str) },
            ),
            "String" => (
                quote! { xstream_api::settings::SettingType::Str },
                quote! { xstream_api::settings::SettingValue::Str(__defaults.#field_name.clone()) },
                quote! { __values.get_str(#field_name_str).map(|v| v.to_string()) },
            ),
            "Duration" => (
                quote! { xstream_api::settings::SettingType::Milliseconds },
                quote! { xstream_api::settings::SettingValue::U64(__defaults.#field_name.as_millis() as u64) },
                quote! { __values.get_duration(#field_name_str) },
            ),
            _ => {
                return Err(syn::Error::new_spanned(
                    field_ty,
                    format!("unsupported type '{ty_name}' (expected bool, u64, usize, String, Duration)"),
                ))
            }
        };

        let default_value = if required {
            quote! { None }
        } else {
            quote! { Some(#default_expr) }
        };

        decl_tokens.push(quote! {
            xstream_api::settings::SettingDecl {
                name: #field_name_str.to_string(),
                setting_type: #type_expr,
                required: #required,
                default: #default_value,
                description: #description_str.to_string(),
            }
        });

        read_tokens.push(if required {
            quote! {
                result.#field_name = #getter_expr.ok_or_else(|| {
                    xstream_api::error::BrokerError::config(
                        format!("missing required setting '{}'", #field_name_str)
                    )
                })?;
            }
        } else {
            quote! {
                if let Some(v) = #getter_expr {
                    result.#field_name = v;
                }
            }
        });
    }

    let expanded = quote! {
        impl #name {
            pub fn declarations() -> Vec<xstream_api::settings::SettingDecl> {
                let __defaults = Self::default();
                vec![
                    #(#decl_tokens),*
                ]
            }

            pub fn from_values(
                __values: &xstream_api::settings::SettingValues,
            ) -> Result<Self, xstream_api::error::BrokerError> {
                let mut result = Self::default();
                #(#read_tokens)*
                Ok(result)
            }
        }
    };

    Ok(TokenStream::from(expanded))
}

/// Extract the last path segment ident name from a type (e.g. `u64`, `Duration`).
fn type_ident_name(ty: &Type) -> Option<String> {
    if let Type::Path(type_path) = ty {
        type_path
            .path
            .segments
            .last()
            .map(|seg| seg.ident.to_string())
    } else {
        None
    }
}
