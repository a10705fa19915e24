use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, Ident, LitStr, Type, parse_macro_input, spanned::Spanned};

/// Derives `convergedb::Entity` for a struct with named fields.
///
/// Struct options: `#[entity(name = "...")]` (defaults to the snake_case
/// struct name). Field options: `id`, `version`, `created_at`, `updated_at`,
/// `created_by`, `updated_by`, `no_save`, `one_of("a", "b", ...)`.
///
/// Also generates a `<Struct>Field` enum naming every field index.
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Identifier,
    Version,
    CreatedAt,
    UpdatedAt,
    CreatedBy,
    UpdatedBy,
}

impl Role {
    fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "id" => Some(Self::Identifier),
            "version" => Some(Self::Version),
            "created_at" => Some(Self::CreatedAt),
            "updated_at" => Some(Self::UpdatedAt),
            "created_by" => Some(Self::CreatedBy),
            "updated_by" => Some(Self::UpdatedBy),
            _ => None,
        }
    }

    fn tokens(self) -> TokenStream2 {
        match self {
            Self::Identifier => quote!(::convergedb::FieldRole::Identifier),
            Self::Version => quote!(::convergedb::FieldRole::Version),
            Self::CreatedAt => quote!(::convergedb::FieldRole::CreatedAt),
            Self::UpdatedAt => quote!(::convergedb::FieldRole::UpdatedAt),
            Self::CreatedBy => quote!(::convergedb::FieldRole::CreatedBy),
            Self::UpdatedBy => quote!(::convergedb::FieldRole::UpdatedBy),
        }
    }
}

#[derive(Default)]
struct FieldOptions {
    role: Option<Role>,
    no_save: bool,
    one_of: Option<Vec<LitStr>>,
}

struct EntityField {
    ident: Ident,
    ty: Type,
    options: FieldOptions,
}

fn expand_entity(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;
    let vis = input.vis;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "Entity does not support generic structs",
        ));
    }

    let entity_name = parse_entity_options(&input.attrs)?
        .unwrap_or_else(|| to_snake_case(&struct_name.to_string()));

    let data_struct = match input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity can only be derived for structs",
            ));
        }
    };

    let named_fields = match data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity requires named fields",
            ));
        }
    };

    let mut fields = Vec::<EntityField>::new();
    for field in named_fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "Entity requires named fields"))?;
        let options = parse_field_options(&field.attrs)?;

        if let Some(role) = options.role {
            if let Some(other) = fields.iter().find(|existing| existing.options.role == Some(role)) {
                return Err(syn::Error::new(
                    ident.span(),
                    format!("field `{}` repeats the role already held by `{}`", ident, other.ident),
                ));
            }
        }

        if options.role == Some(Role::Version) && !is_integer_type(&field.ty) {
            return Err(syn::Error::new(
                field.ty.span(),
                "#[entity(version)] field must be i64, i32 or an Option of either",
            ));
        }

        fields.push(EntityField {
            ident,
            ty: field.ty,
            options,
        });
    }

    if !fields
        .iter()
        .any(|field| field.options.role == Some(Role::Identifier))
    {
        return Err(syn::Error::new(
            struct_name.span(),
            "Entity requires exactly one #[entity(id)] field",
        ));
    }

    let field_defs = fields.iter().map(|field| {
        let name = field_name(&field.ident);
        let mut def = quote!(::convergedb::FieldDef::new(#name));
        if let Some(role) = field.options.role {
            let role = role.tokens();
            def = quote!(#def.role(#role));
        }
        if let Some(values) = &field.options.one_of {
            def = quote!(#def.one_of(&[#(#values),*]));
        }
        if field.options.no_save {
            def = quote!(#def.no_save());
        }
        def
    });

    let get_arms = fields.iter().enumerate().map(|(index, field)| {
        let ident = &field.ident;
        quote! {
            #index => ::convergedb::FieldType::to_value(&self.#ident),
        }
    });

    let set_arms = fields.iter().enumerate().map(|(index, field)| {
        let ident = &field.ident;
        let ty = &field.ty;
        let name = field_name(ident);
        quote! {
            #index => {
                self.#ident = <#ty as ::convergedb::FieldType>::from_value(value)
                    .map_err(|err| ::convergedb::field_type_error(#name, err))?;
                Ok(())
            }
        }
    });

    let enum_name = format_ident!("{}Field", struct_name);
    let variants = fields
        .iter()
        .map(|field| format_ident!("{}", to_pascal_case(&field_name(&field.ident))))
        .collect::<Vec<_>>();
    let names = fields
        .iter()
        .map(|field| field_name(&field.ident))
        .collect::<Vec<_>>();
    let indices = (0..fields.len()).collect::<Vec<_>>();
    let field_count = fields.len();

    Ok(quote! {
        impl ::convergedb::Entity for #struct_name {
            fn schema() -> &'static ::convergedb::EntitySchema {
                ::convergedb::__private::lazy_static! {
                    static ref SCHEMA: ::convergedb::EntitySchema = ::convergedb::EntitySchema::new(
                        #entity_name,
                        vec![#(#field_defs),*],
                    );
                }
                &SCHEMA
            }

            fn field(&self, index: usize) -> ::convergedb::Value {
                match index {
                    #(#get_arms)*
                    _ => ::convergedb::Value::Null,
                }
            }

            fn set_field(&mut self, index: usize, value: ::convergedb::Value) -> ::convergedb::Result<()> {
                match index {
                    #(#set_arms)*
                    _ => Err(::convergedb::DbError::ExecutionError(format!(
                        "{} has no field #{}",
                        #entity_name,
                        index
                    ))),
                }
            }
        }

        #[allow(dead_code)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #vis enum #enum_name {
            #(#variants),*
        }

        impl #enum_name {
            pub const ALL: [#enum_name; #field_count] = [#(#enum_name::#variants),*];

            pub fn index(self) -> usize {
                match self {
                    #(#enum_name::#variants => #indices),*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    #(#enum_name::#variants => #names),*
                }
            }
        }

        impl ::core::convert::From<#enum_name> for usize {
            fn from(field: #enum_name) -> usize {
                field.index()
            }
        }
    })
}

fn parse_entity_options(attrs: &[syn::Attribute]) -> syn::Result<Option<String>> {
    let mut name = None;

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                if lit.value().is_empty() {
                    return Err(meta.error("entity name cannot be empty"));
                }
                name = Some(lit.value());
                return Ok(());
            }

            Err(meta.error("Unsupported #[entity(...)] struct option. Supported: name = \"...\""))
        })?;
    }

    Ok(name)
}

fn parse_field_options(attrs: &[syn::Attribute]) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let Some(ident) = meta.path.get_ident().map(Ident::to_string) else {
                return Err(meta.error("expected a plain #[entity(...)] option"));
            };

            if let Some(role) = Role::from_ident(&ident) {
                if options.role.is_some() {
                    return Err(meta.error("a field can hold only one role"));
                }
                options.role = Some(role);
                return Ok(());
            }

            if ident == "no_save" {
                options.no_save = true;
                return Ok(());
            }

            if ident == "one_of" {
                let content;
                syn::parenthesized!(content in meta.input);
                let values = content.parse_terminated(<LitStr as syn::parse::Parse>::parse, syn::Token![,])?;
                if values.is_empty() {
                    return Err(meta.error("one_of(...) needs at least one value"));
                }
                options.one_of = Some(values.into_iter().collect());
                return Ok(());
            }

            Err(meta.error(
                "Unsupported #[entity(...)] field option. Supported: id, version, created_at, \
                 updated_at, created_by, updated_by, no_save, one_of(\"...\", ...)",
            ))
        })?;
    }

    Ok(options)
}

/// `i64`, `i32`, or an `Option` of either.
fn is_integer_type(ty: &Type) -> bool {
    if is_plain_integer(ty) {
        return true;
    }
    let Type::Path(path) = ty else {
        return false;
    };
    let Some(segment) = path.path.segments.last() else {
        return false;
    };
    if segment.ident != "Option" {
        return false;
    }
    match &segment.arguments {
        syn::PathArguments::AngleBracketed(args) if args.args.len() == 1 => {
            matches!(args.args.first(), Some(syn::GenericArgument::Type(inner)) if is_plain_integer(inner))
        }
        _ => false,
    }
}

fn is_plain_integer(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path.path.is_ident("i64") || path.path.is_ident("i32"),
        _ => false,
    }
}

fn field_name(ident: &Ident) -> String {
    ident.to_string().trim_start_matches("r#").to_string()
}

fn to_pascal_case(value: &str) -> String {
    let mut out = String::new();
    for chunk in value.split('_').filter(|part| !part.is_empty()) {
        let mut chars = chunk.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    if out.is_empty() {
        value.to_string()
    } else {
        out
    }
}

fn to_snake_case(value: &str) -> String {
    let mut out = String::new();
    for (index, ch) in value.chars().enumerate() {
        if ch.is_uppercase() {
            if index > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
